// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Core types and state: domain models, errors, PII and security pattern
//! registries, session state, and the trace recorder. Free of HTTP and
//! rule-evaluation concerns.

pub mod constants;
pub mod detectors;
pub mod errors;
pub mod models;
pub mod pii;
pub mod session;
pub mod trace;
