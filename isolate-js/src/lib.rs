//! An isolate/handle embedding API over a pluggable host JavaScript engine.
//!
//! The host engine ([`HostEngine`]) parses and runs scripts and owns every script-visible value.
//! This crate layers an isolate on top of it:
//! - A chunked, bitmap-allocated heap of tagged objects ([`Heap`], [`TaggedWord`])
//! - Handle scopes and locals ([`HandleScope`], [`EscapableHandleScope`], [`Local`])
//! - Persistent and weak references with two-pass weak callbacks ([`Global`])
//! - Identity-preserving bridges to host objects, embedder classes and internal fields
//! - Contexts, exceptions ([`TryCatch`]) and stack traces ([`StackFrame`])
//! - Per-thread state, a [`Locker`] for shared isolates and cross-thread task dispatch
//!   ([`IsolateHandle`])
//!
//! # Tagged references
//!
//! Every reference is a 64-bit word. A word with the low bit clear is a small integer (Smi) whose
//! value lives in the upper 32 bits; a word with the low bit set is the address of a heap object
//! with the tag bit added. Heap objects are 32-byte aligned and start with a reference to their
//! map, which records the object's kind and instance size. Maps are themselves heap objects; the
//! meta-map is its own map.
//!
//! # Rooting
//!
//! The collector traces from:
//! - **Handle stacks**: every thread that entered the isolate has one, managed by [`HandleScope`].
//!   Dropping a scope pops every local created in it.
//! - **Globals**: strong [`Global`]s until released with [`Isolate::reset_global`]. Weak globals
//!   are not roots; they are cleared when their target dies.
//! - **Per-thread exception and context state**: caught and scheduled exceptions and entered
//!   contexts.
//! - **Host-held bridges**: a bridge whose host value is pinned, or which is a class instance the
//!   host still holds.
//!
//! A root that does not point at a live object means the heap is corrupt, and is fatal.
//!
//! # Host values
//!
//! Host objects, functions and symbols are represented by bridges. The isolate keeps one bridge
//! per host value, so wrapping the same host object twice yields the same local. Bridges hold
//! their host value weakly unless pinned ([`HostPin`]); once the host collects the value, using
//! the bridge fails with [`Error::HostValueCollected`].

#[cfg(not(target_pointer_width = "64"))]
compile_error!("isolate-js requires a 64-bit target");

mod bridge;
mod class;
mod context;
mod dispatch;
mod error;
mod exception;
mod gc;
mod global;
pub mod heap;
pub mod host;
mod isolate;
mod locker;
mod object;
mod options;
mod runtime;
mod scope;
mod script;
mod source;
mod tagged;
mod thread;
mod value;

pub use crate::bridge::HostPin;
pub use crate::class::ClassId;
pub use crate::class::FinalizeInfo;
pub use crate::class::Finalizer;
pub use crate::context::ContextScope;
pub use crate::dispatch::IsolateHandle;
pub use crate::dispatch::Task;
pub use crate::dispatch::WakeHook;
pub use crate::error::DispatchError;
pub use crate::error::Error;
pub use crate::exception::ExceptionMessage;
pub use crate::exception::MessageListener;
pub use crate::exception::TryCatch;
pub use crate::gc::GcCallback;
pub use crate::gc::GcCallbackId;
pub use crate::gc::GcPhase;
pub use crate::gc::GcState;
pub use crate::gc::GcStats;
pub use crate::global::Global;
pub use crate::global::GlobalId;
pub use crate::global::SecondPassCallback;
pub use crate::global::WeakCallback;
pub use crate::global::WeakCallbackInfo;
pub use crate::heap::Heap;
pub use crate::heap::InstanceKind;
pub use crate::host::HostContext;
pub use crate::host::HostEngine;
pub use crate::host::HostResult;
pub use crate::host::HostType;
pub use crate::host::HostValue;
pub use crate::host::LocalHost;
pub use crate::host::NativeFunction;
pub use crate::isolate::Isolate;
pub use crate::locker::Locker;
pub use crate::locker::SharedIsolate;
pub use crate::options::IsolateOptions;
pub use crate::runtime::IsolateId;
pub use crate::runtime::Runtime;
pub use crate::scope::EscapableHandleScope;
pub use crate::scope::HandleScope;
pub use crate::source::format_stack_trace;
pub use crate::source::parse_host_stack;
pub use crate::source::StackFrame;
pub use crate::tagged::HeapRef;
pub use crate::tagged::Tagged;
pub use crate::tagged::TaggedWord;
pub use crate::value::number_to_string;
pub use crate::value::Local;
pub use crate::value::ValueKind;
