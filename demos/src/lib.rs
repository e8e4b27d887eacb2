// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runnable demos live in `examples/`; this crate only anchors them.
