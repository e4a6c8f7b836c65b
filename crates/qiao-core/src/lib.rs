//! # qiao-core
//!
//! Qiao 硬件编解码垫片核心库, 提供错误类型, 比特流读写和线程工具.
//!
//! 本 crate 与具体编解码器无关, 也不依赖任何硬件加速 API.

pub mod bitreader;
pub mod bitwriter;
pub mod error;
pub mod executor;
pub mod registry;

// 重导出常用类型
pub use bitreader::{BitCursor, EmulationRule};
pub use bitwriter::BitWriter;
pub use error::{QiaoError, QiaoResult};
pub use executor::Executor;
pub use registry::{DeviceRegistry, RegistryEntry};
