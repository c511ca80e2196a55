pub mod bundle;
pub mod bundled;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod error;
pub mod ggpk;
pub mod hash;
pub mod index;
pub mod tree;

pub use bundle::{Bundle, BundleHeader};
pub use bundled::{BundledGgpk, GgpkBundles};
pub use codec::{get_compressor, Compressor, CompressorId};
pub use config::StoreOptions;
pub use error::{Error, Result};
pub use ggpk::{Ggpk, GgpkFileStream};
pub use index::{BundleProvider, DirectoryBundles, Index};
pub use hash::NameHashScheme;
