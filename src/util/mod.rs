// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared utilities for the built-in transformer backend.

pub(crate) mod masks;
