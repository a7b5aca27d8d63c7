//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Nodelink Gateway Library
//!
//! This library provides the telnet node server: a lifecycle controller,
//! the accept loop, per-connection session workers, the session registry
//! with its node pool, and the status event bus observers subscribe to.

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod handler;
pub mod listener;
pub mod session;

// Re-export commonly used types
pub use config::{Configuration, ServerConfig};
pub use controller::ServerController;
pub use error::{HandlerError, RegistryError, ServerError};
pub use events::{EventBus, Subscription};
pub use handler::{EchoFactory, EchoHandler, HandlerFactory, Reply, SessionHandler};
pub use listener::{Accept, ListenerLoop};
pub use nodelink_common::{
    CloseReason, NodeNumber, ServerState, SessionId, SessionInfo, StatusEvent, StatusLevel,
};
pub use session::Session;
pub use session::connection::{ConnectionSession, SessionLimits};
pub use session::registry::SessionRegistry;
