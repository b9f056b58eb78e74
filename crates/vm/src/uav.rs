use crate::{Memory, UavError};
use fxvm_core::{FxType, LayoutError, Native, TypeLayout, UAV_TOTAL, UAV0_REGISTER, read_word, write_word};
use slotmap::SlotMap;
use std::collections::HashMap;
use tracing::debug;

slotmap::new_key_type! {
    /// Handle of a [`UavResource`] inside a [`UavPool`].
    pub struct UavKey;
}

/// Byte offset of the first element, the counter word comes before it.
pub const UAV_DATA_OFFSET: usize = 4;

/// An unordered access buffer: a 32 bit counter followed by `length` elements.
#[derive(Debug, Clone)]
pub struct UavResource {
    name: String,
    register: u32,
    element_size: u32,
    length: u32,
    memory: Memory,
}

impl UavResource {
    pub fn new(name: impl Into<String>, element_size: u32, length: u32, register: u32) -> Self {
        let size = UAV_DATA_OFFSET + element_size as usize * length as usize;
        Self {
            name: name.into(),
            register,
            element_size,
            length,
            memory: Memory::zeroed(size),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register(&self) -> u32 {
        self.register
    }

    /// Input slot the resource was declared at (`UAV0_REGISTER + register`).
    pub fn index(&self) -> u32 {
        UAV0_REGISTER + self.register
    }

    pub fn element_size(&self) -> u32 {
        self.element_size
    }

    pub fn len(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn read_counter(&self) -> i32 {
        read_word(self.memory.bytes(), 0) as i32
    }

    pub fn overwrite_counter(&mut self, value: i32) {
        write_word(self.memory.bytes_mut(), 0, value as u32);
    }

    /// Element data, without the counter.
    pub fn data(&self) -> &[u8] {
        &self.memory.bytes()[UAV_DATA_OFFSET..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.memory.bytes_mut()[UAV_DATA_OFFSET..]
    }

    /// The whole buffer, counter included. This is what programs address.
    pub fn buffer(&self) -> &[u8] {
        self.memory.bytes()
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.memory.bytes_mut()
    }

    pub(crate) fn memory(&self) -> &Memory {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Bytes of element `index`, `None` past the end.
    pub fn element(&self, index: u32) -> Option<&[u8]> {
        let size = self.element_size as usize;
        let start = index as usize * size;
        (index < self.length).then(|| &self.data()[start..start + size])
    }

    pub fn element_mut(&mut self, index: u32) -> Option<&mut [u8]> {
        let size = self.element_size as usize;
        let start = index as usize * size;
        (index < self.length).then(|| &mut self.data_mut()[start..start + size])
    }

    pub fn read_element<T: FxType>(&self, index: u32) -> Option<T> {
        self.element(index).map(T::read)
    }

    pub fn write_element<T: FxType>(&mut self, index: u32, value: &T) -> bool {
        match self.element_mut(index) {
            Some(bytes) => {
                value.write(bytes);
                true
            }
            None => false,
        }
    }

    /// Decode element `index` with a runtime layout.
    pub fn decode_element(&self, index: u32, layout: &TypeLayout) -> Option<Result<Native, LayoutError>> {
        self.element(index).map(|bytes| Native::decode(bytes, layout))
    }
}

/// Owns every UAV of a runtime, addressed by [`UavKey`] or by name.
#[derive(Debug, Default)]
pub struct UavPool {
    resources: SlotMap<UavKey, UavResource>,
    names: HashMap<String, UavKey>,
}

impl UavPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zeroed resource, or return the existing one with the same name.
    ///
    /// An existing resource is only reused when its element size and length match.
    pub fn create(&mut self, name: &str, element_size: u32, length: u32, register: u32) -> Result<UavKey, UavError> {
        if register >= UAV_TOTAL {
            return Err(UavError::InvalidRegister(register));
        }

        if let Some(&key) = self.names.get(name) {
            if let Some(existing) = self.resources.get(key) {
                if existing.element_size != element_size || existing.length != length {
                    return Err(UavError::NameCollision {
                        name: name.to_string(),
                        existing_stride: existing.element_size,
                        existing_length: existing.length,
                        stride: element_size,
                        length,
                    });
                }

                debug!(name, element_size, length, "reusing uav");
                return Ok(key);
            }
        }

        let key = self
            .resources
            .insert(UavResource::new(name, element_size, length, register));
        self.names.insert(name.to_string(), key);
        debug!(name, element_size, length, register, "created uav");
        Ok(key)
    }

    pub fn get(&self, key: UavKey) -> Option<&UavResource> {
        self.resources.get(key)
    }

    pub fn get_mut(&mut self, key: UavKey) -> Option<&mut UavResource> {
        self.resources.get_mut(key)
    }

    pub fn find(&self, name: &str) -> Option<UavKey> {
        self.names.get(name).copied()
    }

    pub fn remove(&mut self, key: UavKey) -> Option<UavResource> {
        let resource = self.resources.remove(key)?;
        self.names.remove(&resource.name);
        Some(resource)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (UavKey, &UavResource)> {
        self.resources.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_word_padded() {
        let uav = UavResource::new("bytes", 3, 3, 0);
        assert_eq!(uav.buffer().len(), 16);
        assert_eq!(uav.data().len(), 12);
        assert_eq!(uav.element(2), Some(&[0u8, 0, 0][..]));
        assert_eq!(uav.element(3), None);
    }

    #[test]
    fn elements_never_touch_the_counter() {
        let mut uav = UavResource::new("values", 4, 4, 2);
        uav.overwrite_counter(-7);
        for i in 0..4 {
            assert!(uav.write_element(i, &u32::MAX));
        }
        assert!(!uav.write_element(4, &1u32));

        assert_eq!(uav.read_counter(), -7);
        assert_eq!(uav.read_element::<u32>(3), Some(u32::MAX));
        assert_eq!(uav.index(), UAV0_REGISTER + 2);
    }

    #[test]
    fn reuse_by_name() {
        let mut pool = UavPool::new();
        let a = pool.create("uavStates", 4, 16, 0).unwrap();
        let b = pool.create("uavStates", 4, 16, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(a).map(|u| u.register()), Some(0));

        assert_eq!(
            pool.create("uavStates", 8, 16, 0),
            Err(UavError::NameCollision {
                name: "uavStates".into(),
                existing_stride: 4,
                existing_length: 16,
                stride: 8,
                length: 16,
            })
        );
    }

    #[test]
    fn invalid_register() {
        let mut pool = UavPool::new();
        assert_eq!(pool.create("x", 4, 1, UAV_TOTAL), Err(UavError::InvalidRegister(UAV_TOTAL)));
    }

    #[test]
    fn remove_frees_the_name() {
        let mut pool = UavPool::new();
        let key = pool.create("tmp", 4, 1, 0).unwrap();
        assert!(pool.remove(key).is_some());
        assert_eq!(pool.find("tmp"), None);
        assert!(pool.get(key).is_none());
        assert!(pool.create("tmp", 8, 2, 0).is_ok());
    }
}
