mod interpreter;

pub use interpreter::*;

/// A value that fits a single 32 bit register.
pub trait Word: Copy {
    fn from_word(word: u32) -> Self;
    fn into_word(self) -> u32;
}

impl Word for u32 {
    fn from_word(word: u32) -> Self {
        word
    }

    fn into_word(self) -> u32 {
        self
    }
}

impl Word for i32 {
    fn from_word(word: u32) -> Self {
        word as i32
    }

    fn into_word(self) -> u32 {
        self as u32
    }
}

impl Word for f32 {
    fn from_word(word: u32) -> Self {
        f32::from_bits(word)
    }

    fn into_word(self) -> u32 {
        self.to_bits()
    }
}

impl Word for bool {
    fn from_word(word: u32) -> Self {
        word != 0
    }

    fn into_word(self) -> u32 {
        self as u32
    }
}
