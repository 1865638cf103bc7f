//! Typed messages passed between stages
//!
//! A [`Message`] pairs a [`MessageKind`] (the type tag) with an owned payload.
//! Any `Clone + Debug + Send + Sync + 'static` value can travel as a payload;
//! the kind is derived from the payload's Rust type, so an edge declared for
//! `MessageKind::of::<Transaction>()` only ever carries `Transaction` values.
//!
//! Messages are immutable once sent. When one message fans out to several
//! stages each destination receives its own clone of the payload.
//!
//! ```rust
//! use stagegraph_core::{Message, MessageKind};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Transaction { id: String }
//!
//! let msg = Message::new(Transaction { id: "tx-1".into() });
//! assert_eq!(msg.kind(), &MessageKind::of::<Transaction>());
//! assert_eq!(msg.downcast_ref::<Transaction>().unwrap().id, "tx-1");
//! assert!(msg.downcast_ref::<String>().is_none());
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Type tag of a message
///
/// Two kinds are equal when they describe the same Rust type. The type name is
/// kept for diagnostics, validation errors and visualization.
#[derive(Clone, Copy)]
pub struct MessageKind {
    id: TypeId,
    name: &'static str,
}

impl MessageKind {
    /// Kind of payload type `T`
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Fully qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without module paths, e.g. `Vec<Transaction>`
    pub fn short_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut segment = String::new();
        for ch in self.name.chars() {
            match ch {
                ':' => segment.clear(),
                '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' | ';' => {
                    out.push_str(&segment);
                    segment.clear();
                    out.push(ch);
                }
                _ => segment.push(ch),
            }
        }
        out.push_str(&segment);
        out
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }
}

impl PartialEq for MessageKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageKind {}

impl Hash for MessageKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageKind").field(&self.name).finish()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Object-safe view of a payload value
///
/// Implemented for every `Clone + Debug + Send + Sync + 'static` type; there is
/// no need to implement it by hand.
pub trait Payload: Any + Send + Sync + fmt::Debug {
    fn clone_payload(&self) -> Box<dyn Payload>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T> Payload for T
where
    T: Any + Clone + Send + Sync + fmt::Debug,
{
    fn clone_payload(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

/// An immutable typed payload in transit between stages
pub struct Message {
    kind: MessageKind,
    payload: Box<dyn Payload>,
}

impl Message {
    /// Wrap a payload value
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Clone + Send + Sync + fmt::Debug,
    {
        Self {
            kind: MessageKind::of::<T>(),
            payload: Box::new(value),
        }
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Whether the payload is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.kind.id == TypeId::of::<T>()
    }

    /// Borrow the payload as a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    /// Take the payload out as a `T`
    ///
    /// Returns `None` (consuming the message) when the payload is another type;
    /// check [`is`](Self::is) first when the message must survive a mismatch.
    pub fn into_payload<T: Any>(self) -> Option<T> {
        self.payload.into_any().downcast::<T>().ok().map(|boxed| *boxed)
    }
}

impl Clone for Message {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            payload: self.payload.clone_payload(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind.short_name())
            .field("payload", &self.payload)
            .finish()
    }
}
