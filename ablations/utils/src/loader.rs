//! 预测记录 (`(模拟数, 切片数)` 的 `.npy` 文件) 加载器.

use brain_berry::aggregate::PredictionTrace;
use ndarray::Array2;
use ndarray_npy::ReadNpyError;
use std::path::{Path, PathBuf};
use std::{env, fs, io};

/// 获取 `$HOME/dataset/brain-age/traces`. 无法确定主目录时返回 `None`.
pub fn home_trace_dir() -> Option<PathBuf> {
    let mut p = dirs::home_dir()?;
    p.extend(["dataset", "brain-age", "traces"]);
    Some(p)
}

/// 获取预测记录基本路径.
///
/// 1. 若环境变量 `$BRAIN_BERRY_TRACE_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/brain-age/traces`.
pub fn trace_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("BRAIN_BERRY_TRACE_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_trace_dir(),
    }
}

/// 列出 `dir` 下的全部 `.npy` 文件, 按文件名排序.
pub fn list_traces<P: AsRef<Path>>(dir: P) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "npy") {
            files.push(path);
        }
    }
    files.sort_unstable();
    Ok(files)
}

/// 读取一个预测记录.
pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<PredictionTrace, ReadNpyError> {
    let arr: Array2<f32> = ndarray_npy::read_npy(path)?;
    Ok(PredictionTrace::from_array(arr.view()))
}
