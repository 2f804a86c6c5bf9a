// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request outcome counters.

use crate::error::Error;

/// Counters accumulated over all requests issued through a
/// [`Network`](crate::client::Network).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    pub all: u64,
    /// Corrupted or non-matching replies.
    pub invalid: u64,
    pub timeout: u64,
    /// Exception responses.
    pub exception: u64,
    pub other: u64,
}

impl RequestStats {
    pub(crate) fn update(&mut self, result: &Result<(), Error>) {
        self.all += 1;
        let Err(err) = result else {
            return;
        };
        match err {
            Error::Exception(_) => self.exception += 1,
            err if err.is_msg_invalid() => self.invalid += 1,
            Error::Timeout => self.timeout += 1,
            _ => self.other += 1,
        }
    }

    /// Share of `num` relative to the total number of requests, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage(&self, num: u64) -> f64 {
        100.0 * num as f64 / self.all as f64
    }
}
