//! Config - 설정 관리
//!
//! - `executor.rs` - ExecutorConfig (작업 디렉토리, 샘플링 주기, 용량)

mod executor;

pub use executor::{ExecutorConfig, EXECUTOR_CONFIG_FILE};
