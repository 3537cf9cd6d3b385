// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod common;
mod lctl;
mod locate;
mod pagelock;
mod vmassist;
