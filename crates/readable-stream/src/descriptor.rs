//! Static capability descriptor for host bindings.
//!
//! A host embedding layer (a script engine binding, an RPC bridge) walks
//! this table to expose stream attributes and operations under their
//! external names without hard-coding the list.

/// A read-only or writable attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: &'static str,
    pub read_only: bool,
}

/// An operation and the number of arguments it declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub arity: u8,
}

/// Attributes and operations exposed by a stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub name: &'static str,
    pub attributes: &'static [AttributeDescriptor],
    pub operations: &'static [OperationDescriptor],
}

impl CapabilityDescriptor {
    /// Looks up an operation by external name.
    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Looks up an attribute by external name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    /// Returns `true` if `name` is an exposed attribute or operation.
    pub fn supports(&self, name: &str) -> bool {
        self.operation(name).is_some() || self.attribute(name).is_some()
    }
}

pub(crate) const READABLE_STREAM: CapabilityDescriptor = CapabilityDescriptor {
    name: "ReadableStream",
    attributes: &[AttributeDescriptor {
        name: "locked",
        read_only: true,
    }],
    operations: &[
        OperationDescriptor { name: "cancel", arity: 0 },
        OperationDescriptor { name: "getReader", arity: 0 },
        OperationDescriptor { name: "pipeTo", arity: 1 },
        OperationDescriptor { name: "pipeThrough", arity: 2 },
        OperationDescriptor { name: "tee", arity: 0 },
    ],
};
