//! osb-state: the instance registry.
//!
//! Authoritative store of service instance and binding records. The
//! [`InstanceRegistry`] trait is the seam the broker talks to; two backends
//! implement it:
//!
//! - [`MemoryRegistry`]: `RwLock`-guarded hash maps, for tests and
//!   single-process brokers without durability needs
//! - [`RedbRegistry`]: [redb](https://docs.rs/redb) tables with
//!   JSON-serialized values, on-disk or in-memory
//!
//! Both keep an instance's `binding_ids` set in step with the bindings
//! table inside the same write, so a binding never outlives its instance.

pub mod error;
pub mod memory;
pub mod registry;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use memory::MemoryRegistry;
pub use registry::{BindingMutator, InstanceMutator, InstanceRegistry};
pub use store::RedbRegistry;
