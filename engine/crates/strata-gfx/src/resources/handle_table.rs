/// 可回收 slot 的资源表
///
/// 将 `u32` 索引映射到堆上的对象，被移除的索引进入 free list，下一次插入时优先复用。
/// 访问无效索引属于调用方的逻辑错误，直接 panic。
pub struct HandleTable<T> {
    slots: Vec<Option<Box<T>>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }
}

// insert & remove
impl<T> HandleTable<T> {
    pub fn insert(&mut self, value: T) -> u32 {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            debug_assert!(self.slots[index as usize].is_none());
            self.slots[index as usize] = Some(Box::new(value));
            return index;
        }

        self.slots.push(Some(Box::new(value)));
        (self.slots.len() - 1) as u32
    }

    pub fn remove(&mut self, index: u32) -> T {
        let value = self
            .slots
            .get_mut(index as usize)
            .and_then(Option::take)
            .unwrap_or_else(|| panic!("HandleTable: remove invalid index {index}"));
        self.free_list.push(index);
        self.len -= 1;
        *value
    }

    /// 原地替换对象，返回旧对象，索引保持不变
    pub fn replace(&mut self, index: u32, value: T) -> T {
        std::mem::replace(self.get_mut(index), value)
    }

    /// 移除所有对象，索引全部回到 free list
    pub fn drain(&mut self) -> Vec<(u32, T)> {
        let drained = self
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.take().map(|value| (index as u32, *value)))
            .collect::<Vec<_>>();
        self.free_list.extend(drained.iter().map(|(index, _)| *index));
        self.len = 0;
        drained
    }
}

// getter & iter
impl<T> HandleTable<T> {
    #[inline]
    pub fn get(&self, index: u32) -> &T {
        self.try_get(index).unwrap_or_else(|| panic!("HandleTable: invalid index {index}"))
    }

    #[inline]
    pub fn get_mut(&mut self, index: u32) -> &mut T {
        self.slots
            .get_mut(index as usize)
            .and_then(|slot| slot.as_deref_mut())
            .unwrap_or_else(|| panic!("HandleTable: invalid index {index}"))
    }

    #[inline]
    pub fn try_get(&self, index: u32) -> Option<&T> {
        self.slots.get(index as usize).and_then(|slot| slot.as_deref())
    }

    #[inline]
    pub fn contains(&self, index: u32) -> bool {
        self.try_get(index).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| slot.as_deref().map(|value| (index as u32, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut table = HandleTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_ne!(a, b);
        assert_eq!(*table.get(a), "a");
        assert_eq!(*table.get(b), "b");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_reuse_freed_index() {
        let mut table = HandleTable::new();
        let a = table.insert(1);
        let _b = table.insert(2);
        assert_eq!(table.remove(a), 1);
        assert!(!table.contains(a));

        let c = table.insert(3);
        assert_eq!(c, a);
        assert_eq!(*table.get(c), 3);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_replace_keeps_index() {
        let mut table = HandleTable::new();
        let a = table.insert(String::from("old"));
        let old = table.replace(a, String::from("new"));
        assert_eq!(old, "old");
        assert_eq!(table.get(a), "new");
    }

    #[test]
    fn test_drain() {
        let mut table = HandleTable::new();
        table.insert(1);
        let b = table.insert(2);
        table.insert(3);
        table.remove(b);

        let drained = table.drain();
        assert_eq!(drained, vec![(0, 1), (2, 3)]);
        assert!(table.is_empty());
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    #[should_panic]
    fn test_invalid_index_panics() {
        let table = HandleTable::<u32>::new();
        table.get(0);
    }
}
