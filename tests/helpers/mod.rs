// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

mod test_builder;

pub use test_builder::*;

/// Routes the graph's `log` output to the test harness. Set `RUST_LOG=debug`
/// to see it.
pub fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}
