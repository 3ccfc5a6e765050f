//! The closed type vocabulary shared by the TAC IR and the region graph.
//!
//! Types are structural: two types are equal iff they have the same shape.
//! Besides the usual value types there are two "threading" types that exist
//! to encode ordering as dataflow: [`Type::Memory`], the memory-state token
//! sequencing memory operations, and [`Type::Control`], the result of a
//! predicate that a gamma or theta branches on.

use core::fmt;

/// A type in the vocabulary.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    /// A bit vector of the given width.
    Bits(u32),
    /// A floating point number.
    Float,
    /// A function with arguments and results.
    Function(FunctionType),
    /// A pointer to a value of the pointee type.
    Pointer(Box<Type>),
    /// A record with ordered fields.
    Record(Vec<Type>),
    /// A fixed-size array.
    Array(Box<Type>, u64),
    /// A memory-state token.
    Memory,
    /// A control value selecting one of `n` alternatives.
    Control(u32),
}

impl Type {
    /// Shorthand for a pointer to `pointee`.
    pub fn pointer(pointee: Type) -> Self {
        Self::Pointer(Box::new(pointee))
    }

    /// Is this a pointer type?
    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer(_))
    }

    /// Is this the memory-state type?
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }

    /// Is this a control type?
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Control(_))
    }

    /// Is this an ordinary value type, i.e. neither memory state nor control?
    pub fn is_value(&self) -> bool {
        !self.is_memory() && !self.is_control()
    }

    /// The pointee of a pointer type.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Self::Pointer(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bits(w) => write!(f, "bit{}", w),
            Self::Float => write!(f, "float"),
            Self::Function(sig) => write!(f, "{}", sig),
            Self::Pointer(p) => write!(f, "{}*", p),
            Self::Record(fields) => {
                write!(f, "{{")?;
                for (n, field) in fields.iter().enumerate() {
                    if n != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, "}}")
            }
            Self::Array(elem, len) => write!(f, "[{} x {}]", len, elem),
            Self::Memory => write!(f, "mem"),
            Self::Control(n) => write!(f, "ctl{}", n),
        }
    }
}

/// The type of a function: ordered parameter and result types, plus a flag
/// for C-style variadic functions.
///
/// By convention every function in this IR threads one memory-state token:
/// `Memory` appears exactly once among the parameters and once among the
/// results.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FunctionType {
    /// Parameter types, in order.
    pub params: Vec<Type>,
    /// Result types, in order.
    pub results: Vec<Type>,
    /// Whether the function accepts additional variadic arguments.
    pub varargs: bool,
}

impl FunctionType {
    /// Create a non-variadic function type.
    pub fn new(params: Vec<Type>, results: Vec<Type>) -> Self {
        Self {
            params,
            results,
            varargs: false,
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "fn(")?;
        for (n, param) in self.params.iter().enumerate() {
            if n != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ") -> (")?;
        for (n, result) in self.results.iter().enumerate() {
            if n != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", result)?;
        }
        write!(f, ")")
    }
}
