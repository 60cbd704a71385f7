//! Description of the target machine, as far as inference cares.

/// The handful of target facts the inference core consumes: the pointer
/// width, and a stable mapping from numeric built-in names to widths.
#[derive(Clone, Debug)]
pub struct TargetDescriptor {
    pointer_width_bits: usize,
    bool_width_bits: usize,
    char_width_bits: usize,
    short_width_bits: usize,
    int_width_bits: usize,
    long_width_bits: usize,
}

impl TargetDescriptor {
    /// A target with the given pointer width and conventional ILP32/LP64
    /// widths for the numeric built-ins.
    pub fn with_pointer_width(pointer_width_bits: usize) -> Self {
        Self {
            pointer_width_bits,
            bool_width_bits: 1,
            char_width_bits: 8,
            short_width_bits: 16,
            int_width_bits: 32,
            long_width_bits: pointer_width_bits,
        }
    }

    pub fn pointer_width_bits(&self) -> usize {
        self.pointer_width_bits
    }

    /// Width of a named numeric built-in, or `None` for names this target
    /// does not define. The mapping is stable for the lifetime of the
    /// descriptor.
    pub fn builtin_width_bits(&self, name: &str) -> Option<usize> {
        match name {
            "bool" => Some(self.bool_width_bits),
            "char" => Some(self.char_width_bits),
            "short" => Some(self.short_width_bits),
            "int" => Some(self.int_width_bits),
            "long" => Some(self.long_width_bits),
            _ => None,
        }
    }
}

impl Default for TargetDescriptor {
    fn default() -> Self {
        Self::with_pointer_width(64)
    }
}
