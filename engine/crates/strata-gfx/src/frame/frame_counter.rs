pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    /// 当前使用的 frame slot
    current_frame: usize,
    frames_in_flight: usize,
}
// new & init
impl FrameCounter {
    pub fn new(frames_in_flight: usize) -> Self {
        debug_assert!(frames_in_flight > 0);
        Self {
            frame_id: 0,
            current_frame: 0,
            frames_in_flight,
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// 用于日志，例如 `[F12B]`
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, (b'A' + self.current_frame as u8) as char)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle() {
        let mut counter = FrameCounter::new(3);
        let frames = (0..7)
            .map(|_| {
                let frame = counter.current_frame();
                counter.next_frame();
                frame
            })
            .collect::<Vec<_>>();
        assert_eq!(frames, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(counter.frame_id(), 7);
        assert_eq!(counter.frame_name(), "[F7B]");
    }
}
