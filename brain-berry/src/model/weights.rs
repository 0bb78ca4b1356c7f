//! 预训练权重的本地缓存.
//!
//! 权重缺失时先下载到同目录下的 `*.part` 文件, 完成后原子重命名.
//! 同一进程内对同一路径的下载互斥, 因此并发的首次调用只会下载一次.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info};
use once_cell::sync::Lazy;
use thiserror::Error;

use super::SliceRegressor;
use crate::consts::{DEFAULT_MODEL_ID, DEFAULT_WEIGHTS_FILE};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 下载权重错误.
#[derive(Debug, Error)]
pub enum FetchError {
    /// 网络错误.
    #[error("network error: {0}")]
    Network(String),

    /// 其他底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 加载权重错误.
#[derive(Debug, Error)]
pub enum LoadError {
    /// 文件不可读或形状不匹配.
    #[error("corrupt model file: {0}")]
    Corrupt(String),

    /// 其他底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 获取模型失败的原因.
#[derive(Debug, Error)]
pub enum WeightError {
    /// 无法创建缓存目录.
    #[error("cannot prepare weight directory {}", .path.display())]
    Directory {
        /// 缓存目录.
        path: PathBuf,

        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 下载失败.
    #[error("cannot fetch weights into {}", .path.display())]
    Fetch {
        /// 目标路径.
        path: PathBuf,

        /// 底层错误.
        #[source]
        source: FetchError,
    },

    /// 加载失败.
    #[error("cannot load weights from {}", .path.display())]
    Load {
        /// 权重路径.
        path: PathBuf,

        /// 底层错误.
        #[source]
        source: LoadError,
    },
}

/// 从远程预训练模型仓库下载权重.
pub trait WeightFetcher {
    /// 将 `model_id` 的权重完整写入 `destination`.
    fn fetch(&self, model_id: &str, destination: &Path) -> Result<(), FetchError>;
}

/// 从本地权重文件构建网络.
pub trait ModelLoader {
    /// 加载得到的网络.
    type Model: SliceRegressor;

    /// 加载 `path` 处的权重.
    fn load(&self, path: &Path) -> Result<Self::Model, LoadError>;
}

/// 预训练模型描述.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelSpec {
    /// 模型在远程仓库中的标识.
    pub id: String,

    /// 本地缓存的文件名.
    pub file_name: String,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            id: DEFAULT_MODEL_ID.to_owned(),
            file_name: DEFAULT_WEIGHTS_FILE.to_owned(),
        }
    }
}

/// 每个正在下载的权重路径一把锁.
///
/// 文件落盘后条目即被移除: 之后的调用只需检查文件是否存在, 不会再下载.
/// 下载失败时条目保留, 以免后来者与仍在等待旧锁的线程同时下载.
static DOWNLOAD_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = DOWNLOAD_LOCKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(path.to_owned()).or_default())
}

/// 权重已经落盘, 不再需要 `path` 的下载锁.
fn release_path_lock(path: &Path) {
    DOWNLOAD_LOCKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(path);
}

/// 权重缓存目录.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WeightStore {
    dir: PathBuf,
}

impl WeightStore {
    /// 以 `dir` 为缓存目录. 目录不必已存在.
    #[inline]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// 缓存目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `spec` 对应的本地权重路径.
    #[inline]
    pub fn path_for(&self, spec: &ModelSpec) -> PathBuf {
        self.dir.join(&spec.file_name)
    }

    /// 权重是否已在本地.
    #[inline]
    pub fn is_cached(&self, spec: &ModelSpec) -> bool {
        self.path_for(spec).is_file()
    }

    /// 确保权重在本地, 返回其路径. 已缓存时不会调用 `fetcher`.
    pub fn acquire<F: WeightFetcher + ?Sized>(
        &self,
        spec: &ModelSpec,
        fetcher: &F,
    ) -> Result<PathBuf, WeightError> {
        let path = self.path_for(spec);
        let lock = path_lock(&path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if path.is_file() {
            debug!("weights `{}` cached at {}", spec.id, path.display());
            release_path_lock(&path);
            return Ok(path);
        }

        fs::create_dir_all(&self.dir).map_err(|source| WeightError::Directory {
            path: self.dir.clone(),
            source,
        })?;

        let partial = self.dir.join(format!("{}.part", spec.file_name));
        info!("fetching weights `{}` into {}", spec.id, path.display());
        if let Err(source) = fetcher.fetch(&spec.id, &partial) {
            // 残缺文件不能留下, 否则会被下一次调用当作缓存.
            let _ = fs::remove_file(&partial);
            return Err(WeightError::Fetch { path, source });
        }
        if let Err(e) = fs::rename(&partial, &path) {
            let _ = fs::remove_file(&partial);
            return Err(WeightError::Fetch {
                path,
                source: FetchError::Io(e),
            });
        }
        release_path_lock(&path);
        Ok(path)
    }

    /// 确保权重在本地并加载.
    pub fn load<F, L>(
        &self,
        spec: &ModelSpec,
        fetcher: &F,
        loader: &L,
    ) -> Result<L::Model, WeightError>
    where
        F: WeightFetcher + ?Sized,
        L: ModelLoader + ?Sized,
    {
        let path = self.acquire(spec, fetcher)?;
        loader
            .load(&path)
            .map_err(|source| WeightError::Load { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FetchError, LoadError, ModelLoader, ModelSpec, WeightError, WeightFetcher, WeightStore,
        DOWNLOAD_LOCKS,
    };
    use crate::model::{PredictionError, SliceRegressor};
    use ndarray::ArrayView4;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 写入固定内容并计数.
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    impl WeightFetcher for CountingFetcher {
        fn fetch(&self, model_id: &str, destination: &Path) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::write(destination, model_id.as_bytes())?;
            Ok(())
        }
    }

    /// 写一半后失败.
    struct BrokenFetcher;

    impl WeightFetcher for BrokenFetcher {
        fn fetch(&self, _: &str, destination: &Path) -> Result<(), FetchError> {
            fs::write(destination, b"half")?;
            Err(FetchError::Network("connection reset".into()))
        }
    }

    /// 对每个切片都预测同一个值.
    #[derive(Debug)]
    struct ByteLenModel(pub f32);

    impl SliceRegressor for ByteLenModel {
        fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<f32>, PredictionError> {
            Ok(vec![self.0; batch.len_of(ndarray::Axis(0))])
        }
    }

    /// 以权重文件的字节数作为预测值.
    struct ByteLenLoader;

    impl ModelLoader for ByteLenLoader {
        type Model = ByteLenModel;

        fn load(&self, path: &Path) -> Result<ByteLenModel, LoadError> {
            let bytes = fs::read(path)?;
            if bytes.is_empty() {
                return Err(LoadError::Corrupt("empty weight file".into()));
            }
            Ok(ByteLenModel(bytes.len() as f32))
        }
    }

    #[test]
    fn test_acquire_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path().join("nested").join("weights"));
        let spec = ModelSpec::default();
        let fetcher = CountingFetcher::default();

        assert!(!store.is_cached(&spec));
        let p1 = store.acquire(&spec, &fetcher).unwrap();
        let p2 = store.acquire(&spec, &fetcher).unwrap();

        assert_eq!(p1, p2);
        assert_eq!(p1, store.path_for(&spec));
        assert!(store.is_cached(&spec));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&p1).unwrap(), spec.id.as_bytes());
        assert!(!DOWNLOAD_LOCKS.lock().unwrap().contains_key(&p1));
    }

    #[test]
    fn test_concurrent_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let spec = ModelSpec::default();
        let fetcher = CountingFetcher::default();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| store.acquire(&spec, &fetcher).unwrap());
            }
        });
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(!DOWNLOAD_LOCKS
            .lock()
            .unwrap()
            .contains_key(&store.path_for(&spec)));
    }

    #[test]
    fn test_failed_fetch_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let spec = ModelSpec::default();

        let err = store.acquire(&spec, &BrokenFetcher).unwrap_err();
        assert!(matches!(
            err,
            WeightError::Fetch {
                source: FetchError::Network(_),
                ..
            }
        ));
        assert!(!store.is_cached(&spec));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(DOWNLOAD_LOCKS
            .lock()
            .unwrap()
            .contains_key(&store.path_for(&spec)));
    }

    #[test]
    fn test_load_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let spec = ModelSpec::default();
        fs::write(store.path_for(&spec), b"").unwrap();

        let err = store
            .load(&spec, &CountingFetcher::default(), &ByteLenLoader)
            .unwrap_err();
        assert!(matches!(
            err,
            WeightError::Load {
                source: LoadError::Corrupt(_),
                ..
            }
        ));
    }

    #[test]
    fn test_load_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let spec = ModelSpec {
            id: "abc".into(),
            file_name: "abc.bin".into(),
        };
        let model = store
            .load(&spec, &CountingFetcher::default(), &ByteLenLoader)
            .unwrap();
        assert_eq!(model.0, 3.0);
    }
}
