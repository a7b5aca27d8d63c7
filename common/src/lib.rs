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

//! Nodelink Common Types
//!
//! This crate defines the types shared between the node server and anything
//! that observes or drives it:
//! - Status events published by the server
//! - Server lifecycle states
//! - Session descriptors and close reasons

pub mod session;
pub mod status;

pub use session::{CloseReason, NodeNumber, SessionId, SessionInfo};
pub use status::{ServerState, StatusEvent, StatusLevel};
