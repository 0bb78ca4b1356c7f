//! 跨模拟聚合逐切片预测, 再跨切片取中位数.
//!
//! 在线均值的递推式为
//!
//! ```text
//! i == 1: r = p_1
//! i >= 2: r = r + (p_i - r) / (i + 1)
//! ```
//!
//! 注意除数是 `i + 1`, 因此当模拟数大于 1 时结果并不是算术平均.
//! 已发表的脑龄数值正是这样算出来的, 这里原样保留.

use ordered_float::NotNan;

use crate::augment::Simulation;
use crate::cancel::CancelToken;
use crate::error::{EstimateError, EstimateResult};
use crate::model::{PredictionError, SliceRegressor};
use crate::SliceBatchBuilder;

mod trace;

pub use trace::PredictionTrace;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 逐切片的在线估计.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunningEstimate {
    values: Vec<f64>,
    simulations: usize,
}

impl RunningEstimate {
    /// 空估计.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 折叠下一个模拟的预测.
    ///
    /// 第一次调用直接拷贝 `prediction`. 之后的调用要求长度不变,
    /// 且所有预测都是有限值; 失败时估计保持不变.
    pub fn push(&mut self, prediction: &[f32]) -> Result<(), PredictionError> {
        if self.simulations > 0 && prediction.len() != self.values.len() {
            return Err(PredictionError::LengthMismatch {
                expected: self.values.len(),
                actual: prediction.len(),
            });
        }
        if let Some(pos) = prediction.iter().position(|p| !p.is_finite()) {
            return Err(PredictionError::NonFinite(pos));
        }

        if self.simulations == 0 {
            self.values = prediction.iter().map(|&p| f64::from(p)).collect();
        } else {
            // 第 i 个模拟 (从 1 计) 的除数为 i + 1.
            let divisor = (self.simulations + 2) as f64;
            for (r, &p) in self.values.iter_mut().zip(prediction) {
                *r += (f64::from(p) - *r) / divisor;
            }
        }
        self.simulations += 1;
        Ok(())
    }

    /// 已折叠的模拟个数.
    #[inline]
    pub fn simulations(&self) -> usize {
        self.simulations
    }

    /// 当前的逐切片估计.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// 切片个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否尚未折叠任何模拟.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 逐切片估计的中位数.
    #[inline]
    pub fn median(&self) -> Result<f64, PredictionError> {
        median(&self.values)
    }

    /// 取出逐切片估计.
    #[inline]
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

/// 中位数. 长度为偶数时取中间两个值的平均.
///
/// 空输入返回 [`PredictionError::Empty`], 含 NaN 时返回其位置.
pub fn median(values: &[f64]) -> Result<f64, PredictionError> {
    let mut sorted = values
        .iter()
        .enumerate()
        .map(|(i, &v)| NotNan::new(v).map_err(|_| PredictionError::NonFinite(i)))
        .collect::<Result<Vec<_>, _>>()?;
    if sorted.is_empty() {
        return Err(PredictionError::Empty);
    }
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Ok(sorted[mid].into_inner())
    } else {
        Ok((sorted[mid - 1].into_inner() + sorted[mid].into_inner()) / 2.0)
    }
}

/// 对单个模拟构建批次并调用一次网络.
///
/// 返回的预测向量与批次行一一对应.
pub fn predict_simulation<R: SliceRegressor + ?Sized>(
    builder: &SliceBatchBuilder,
    model: &R,
    simulation: &Simulation<'_>,
) -> EstimateResult<Vec<f32>> {
    let index = simulation.index();
    let batch = builder.build(simulation.volume())?;
    let prediction = model
        .predict(batch.view())
        .map_err(|source| EstimateError::Prediction {
            simulation: index,
            source,
        })?;
    if prediction.len() != batch.len() {
        return Err(EstimateError::Prediction {
            simulation: index,
            source: PredictionError::LengthMismatch {
                expected: batch.len(),
                actual: prediction.len(),
            },
        });
    }
    Ok(prediction)
}

/// 聚合结果.
#[derive(Clone, Debug)]
pub struct Aggregated {
    /// 逐切片估计.
    pub estimate: RunningEstimate,

    /// 每个模拟的原始预测, 仅在要求保留时存在.
    pub trace: Option<PredictionTrace>,
}

impl Aggregated {
    fn empty(keep_trace: bool, slices: usize) -> Self {
        Self {
            estimate: RunningEstimate::new(),
            trace: keep_trace.then(|| PredictionTrace::new(slices)),
        }
    }

    fn fold(&mut self, simulation: usize, prediction: &[f32]) -> EstimateResult<()> {
        self.estimate
            .push(prediction)
            .map_err(|source| EstimateError::Prediction { simulation, source })?;
        if let Some(trace) = self.trace.as_mut() {
            trace.push(prediction);
        }
        Ok(())
    }
}

/// 按模拟序逐个预测并折叠.
pub struct PredictionAggregator<'a, R: ?Sized> {
    builder: SliceBatchBuilder,
    model: &'a R,
    verbose: bool,
    keep_trace: bool,
}

impl<'a, R: SliceRegressor + ?Sized> PredictionAggregator<'a, R> {
    /// 创建聚合器.
    #[inline]
    pub fn new(builder: SliceBatchBuilder, model: &'a R) -> Self {
        Self {
            builder,
            model,
            verbose: false,
            keep_trace: false,
        }
    }

    /// 以 info 级别报告进度.
    #[inline]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// 保留每个模拟的原始预测.
    #[inline]
    pub fn keep_trace(mut self, keep_trace: bool) -> Self {
        self.keep_trace = keep_trace;
        self
    }

    /// 串行地逐个模拟预测并折叠.
    ///
    /// 每个模拟开始之前检查一次 `cancel`; 最后一个模拟完成后不再检查,
    /// 因此已经算完的结果不会被丢弃. 任何一个模拟失败都会立即终止.
    pub fn aggregate<'v, I>(
        &self,
        simulations: I,
        cancel: &CancelToken,
    ) -> EstimateResult<Aggregated>
    where
        I: IntoIterator<Item = EstimateResult<Simulation<'v>>>,
        I::IntoIter: ExactSizeIterator,
    {
        let mut simulations = simulations.into_iter();
        let total = simulations.len();
        let mut out = Aggregated::empty(self.keep_trace, self.builder.batch_len());

        let mut completed = 0;
        while simulations.len() > 0 {
            cancel.check(completed)?;
            let Some(simulation) = simulations.next() else {
                break;
            };
            let simulation = simulation?;
            let prediction = predict_simulation(&self.builder, self.model, &simulation)?;
            out.fold(simulation.index(), &prediction)?;

            completed += 1;
            progress!(self.verbose, "simulation {}/{} done", completed, total);
        }
        Ok(out)
    }

    /// 先按序生成全部模拟, 再借助 `rayon` 并行预测, 最后按模拟序折叠.
    ///
    /// 所有扰动体数据会同时驻留内存. 取消只在生成阶段检查.
    #[cfg(feature = "rayon")]
    pub fn aggregate_par<'v, I>(
        &self,
        simulations: I,
        cancel: &CancelToken,
    ) -> EstimateResult<Aggregated>
    where
        I: IntoIterator<Item = EstimateResult<Simulation<'v>>>,
        I::IntoIter: ExactSizeIterator,
    {
        let mut simulations = simulations.into_iter();
        let mut pending = Vec::with_capacity(simulations.len());
        while simulations.len() > 0 {
            cancel.check(0)?;
            let Some(simulation) = simulations.next() else {
                break;
            };
            pending.push(simulation?);
        }
        progress!(
            self.verbose,
            "predicting {} simulations in parallel",
            pending.len()
        );

        let predictions = pending
            .par_iter()
            .map(|s| predict_simulation(&self.builder, self.model, s))
            .collect::<EstimateResult<Vec<_>>>()?;

        let mut out = Aggregated::empty(self.keep_trace, self.builder.batch_len());
        for (simulation, prediction) in pending.iter().zip(&predictions) {
            out.fold(simulation.index(), prediction)?;
        }
        Ok(out)
    }
}
