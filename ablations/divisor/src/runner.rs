//! 程序运行函数.

use crate::result::{AblationResult, Comparison, Outcome};
use brain_berry::aggregate::{median, PredictionTrace, RunningEstimate};
use brain_berry::model::PredictionError;
use std::io;
use std::path::PathBuf;
use std::thread;
use utils::loader;

/// 少于两个模拟时两种聚合方式完全一致.
const MIN_SIMULATIONS: usize = 2;

/// 同一份记录分别按字面递推式和算术平均聚合.
pub fn compare(trace: &PredictionTrace) -> Result<Comparison, PredictionError> {
    let mut literal = RunningEstimate::new();
    let mut sum = vec![0.0f64; trace.slices()];
    for i in 0..trace.len() {
        let row = trace.row(i);
        literal.push(row)?;
        for (s, &p) in sum.iter_mut().zip(row) {
            *s += f64::from(p);
        }
    }

    let n = trace.len() as f64;
    let mean: Vec<f64> = sum.into_iter().map(|s| s / n).collect();
    Ok(Comparison {
        simulations: trace.len(),
        slices: trace.slices(),
        literal: literal.median()?,
        mean: median(&mean)?,
    })
}

/// 处理一组记录文件.
fn compare_files(files: &[PathBuf]) -> Vec<Outcome> {
    files
        .iter()
        .map(|path| {
            let r = loader::read_trace(path)
                .map_err(|e| e.to_string())
                .and_then(|t| {
                    if utils::is_informative(&t, MIN_SIMULATIONS) {
                        compare(&t).map_err(|e| e.to_string())
                    } else {
                        Err(format!("only {} simulations recorded", t.len()))
                    }
                });
            (path.clone(), r)
        })
        .collect()
}

/// 取出一个工作线程的结果. 线程 panic 时, 该组的每个文件都记为失败.
fn chunk_outcomes(files: &[PathBuf], joined: thread::Result<Vec<Outcome>>) -> Vec<Outcome> {
    match joined {
        Ok(outcomes) => outcomes,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("worker for {} traces panicked: {reason}", files.len());
            files
                .iter()
                .map(|p| (p.clone(), Err(format!("worker panicked: {reason}"))))
                .collect()
        }
    }
}

/// 实际运行.
pub fn run() -> io::Result<AblationResult> {
    let dir = loader::trace_dir_from_env_or_home().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "cannot locate the trace directory")
    })?;
    let files = loader::list_traces(&dir)?;
    log::info!("{} traces found in {}", files.len(), dir.display());
    if files.is_empty() {
        return Ok(AblationResult::from_iter([]));
    }

    let chunk = files.len().div_ceil(utils::cpus());
    log::info!("Running ablation studies...");
    let outcomes = thread::scope(|s| {
        let handles: Vec<_> = files
            .chunks(chunk)
            .map(|c| (c, s.spawn(move || compare_files(c))))
            .collect();
        handles
            .into_iter()
            .flat_map(|(c, h)| chunk_outcomes(c, h.join()))
            .collect::<Vec<_>>()
    });

    Ok(AblationResult::from_iter(outcomes))
}
