//! 基础设施层
//!
//! 持有稀缺资源（浏览器页面、输出目录），只向上暴露能力。

pub mod chrome_navigator;
pub mod mock_navigator;
pub mod navigator;
pub mod storage;

pub use chrome_navigator::ChromeNavigator;
pub use mock_navigator::{MockNavigator, MockOp, MockProbe};
pub use navigator::{DownloadedDocument, FieldMap, Navigator, NavigatorFactory};
pub use storage::{DocumentStore, FsDocumentStore, StorageStats};
