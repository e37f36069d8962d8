pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use assertions::{assert_contains, assert_path_missing};
pub use fixtures::{BUILD_ENV, BuildDir, run_with_stdin};
pub use logging::init_test_logging;
