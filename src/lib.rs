// Copyright 2026 The Car Trust Authors
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

//! Car Trust BLE peripheral.
//!
//! A GATT server plus LE advertising for the trusted-device service, with a
//! bounded advertising retry while the adapter comes up. The platform
//! (BlueZ, or an in-memory stack) sits behind [`bluetooth::BlePlatform`].

pub mod bluetooth;
pub mod config;
pub mod events;
pub mod state;
