//! KPIO Capability Security
//!
//! Principal-based origin security engine for the KPIO browser. Decides
//! whether running script may touch a property of a host object, whether a
//! principal may load a URI, and whether a named capability is enabled.
//!
//! # Modules
//!
//! - `principal`: Security identities (system, codebase, certificate, null, expanded)
//! - `registry`: Principal interning and configured capability grants
//! - `policy`: Security levels and the group/class/property policy tree
//! - `store`: Site-keyed policy database built from preferences
//! - `lookup`: Policy precedence resolution with per-principal caching
//! - `engine`: The `SecurityEngine` entry points
//! - `uri`, `protocol`, `fixup`: URI model, handler flags and fix-up
//! - `prefs`: Preference store and configuration keys
//!
//! # Usage
//!
//! Build one [`SecurityEngine`] at startup and hand `&SecurityEngine` to the
//! DOM layer, the loader and the wrapper layer. Script engine hooks describe
//! the running stack with an [`ExecutionContext`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod atom;
pub mod capability;
pub mod context;
pub mod engine;
pub mod error;
pub mod fixup;
pub mod lookup;
pub mod object;
pub mod policy;
pub mod prefs;
pub mod principal;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod store;
pub mod uri;


pub use capability::{EnableDecision, UNIVERSAL_CAPABILITY};
pub use context::{ExecutionContext, StackFrame};
pub use engine::{EngineSettings, SecurityEngine, SecurityEngineBuilder};
pub use error::{AccessError, CapsResult};
pub use object::{ClassFlags, ClassInfo, HostObject, SecuredObject};
pub use policy::{Action, PropertyKey, SecurityLevel};
pub use prefs::{PrefValue, Preferences};
pub use principal::{AppId, Principal, NO_APP_ID, UNKNOWN_APP_ID};
pub use protocol::{ChromeRegistry, LoadFlags, ProtocolFlags, ProtocolHandlers};
pub use uri::Uri;
