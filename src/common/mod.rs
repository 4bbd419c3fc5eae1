/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

pub mod auth_results;
pub mod cache;
pub mod config;
pub mod lru;
pub mod parse;
pub mod resolver;
pub mod transport;
