/// 固定容量的索引分配器，用于 CPU 端的 RTV/DSV heap
///
/// `[0, next)` 范围内的索引要么存活，要么位于 `free` 中
#[derive(Debug)]
pub struct FreeList {
    next: u32,
    free: Vec<u32>,
    capacity: u32,
}

impl FreeList {
    pub fn new(capacity: u32) -> Self {
        Self {
            next: 0,
            free: Vec::new(),
            capacity,
        }
    }

    /// 优先复用释放过的索引，耗尽时返回 None
    pub fn allocate(&mut self) -> Option<u32> {
        if let Some(index) = self.free.pop() {
            return Some(index);
        }
        if self.next >= self.capacity {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(index)
    }

    pub fn release(&mut self, index: u32) {
        debug_assert!(index < self.next, "index {index} is never allocated");
        debug_assert!(!self.free.contains(&index), "index {index} is released twice");
        self.free.push(index);
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn live_count(&self) -> u32 {
        self.next - self.free.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_exhausted() {
        let mut list = FreeList::new(2);
        assert_eq!(list.allocate(), Some(0));
        assert_eq!(list.allocate(), Some(1));
        assert_eq!(list.allocate(), None);
        assert_eq!(list.live_count(), 2);
    }

    #[test]
    fn test_release_reuses_index() {
        let mut list = FreeList::new(4);
        let a = list.allocate().unwrap();
        let b = list.allocate().unwrap();
        list.release(a);
        assert_eq!(list.allocate(), Some(a));
        assert_ne!(a, b);
        assert_eq!(list.live_count(), 2);
    }
}
