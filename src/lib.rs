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

//! PolicyShield: a runtime policy enforcement layer.
//!
//! This library sits between an AI agent's tool-invocation decisions and
//! the actual execution of those tools. Each call is checked against a
//! declarative rule set and answered with a verdict: allow, block, redact
//! arguments, or suspend pending human approval.

pub mod approval;
pub mod config;
pub mod engine;
pub mod engine_core;
pub mod server;
pub mod utils;
