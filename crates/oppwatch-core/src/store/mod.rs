//! Store - 状態ファイルの永続化
//!
//! - SeenStore: 既に通知したレコードの履歴（JSON 配列）
//! - SessionFile: PageDriver が理解するログイン状態（中身は不透明）
//!
//! どちらも書き込みは「一時ファイルに書いて rename」の全置換。
//! 部分書き込みで壊れたファイルを残さないため。

mod seen;
mod session_file;

pub use self::seen::{SeenStore, diff_new};
pub use self::session_file::SessionFile;

use std::path::Path;

use thiserror::Error;

/// Persistence failures. Callers log these and keep running.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Replace `path` with `contents` via a sibling temp file and rename.
pub(crate) async fn replace_file(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        // rename できなければ一時ファイルは残さない
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
