//! 基于 Vose 别名法的加权采样器。
//!
//! ## 设计目标（Why）
//! - 名字树中的加权联合在每次派发时都要抽样一次，必须做到 O(1) 查询；
//! - 构造过程 O(n) 且数值稳定，分区/名字树重建时不会成为瓶颈。
//!
//! ## 算法概览（How）
//! 1. 将概率乘以 `n`，按是否小于 1 放入 `small`/`large` 两个队列；
//! 2. 每次取一个 small 与一个 large 配对：`probability[s] = p(s)`、`alias[s] = l`，
//!    再以 `p(l) = (p(s) + p(l)) - 1` 扣减 large 的余量并重新入队；
//! 3. 队列中剩余的下标概率均置为 1。
//!
//! ## 契约说明（What）
//! - 构造完成后结构不可变，可在线程间无锁共享；
//! - 唯一可变的状态是调用方传入的随机源。

use std::collections::VecDeque;

use rand::Rng;

use crate::error::SamplerError;

/// `build` 接受的归一化容差。
const NORMALIZATION_TOLERANCE: f64 = 0.01;

/// 别名采样表。
///
/// # 教案式说明
/// - **意图 (Why)**：以两张等长数组表达任意离散分布，查询只需一次均匀下标 + 一次均匀实数；
/// - **契约 (What)**：
///   - 对所有 `i`，`probability[i] ∈ [0, 1]`；
///   - `alias[i]` 总是合法下标，当 `probability[i] == 1` 时不会被使用（此时等于 `i` 自身）；
/// - **风险 (Trade-offs)**：浮点误差会让极小权重的项有轻微偏差，
///   但不会产生越界下标或负概率。
#[derive(Clone, Debug, PartialEq)]
pub struct AliasSampler {
    probability: Box<[f64]>,
    alias: Box<[usize]>,
}

impl AliasSampler {
    /// 由已归一化的概率分布构造采样器。
    ///
    /// # 契约
    /// - 空输入返回 [`SamplerError::EmptyDistribution`]；
    /// - 负数或非有限项返回 [`SamplerError::InvalidWeight`]；
    /// - 总和偏离 1 超过 0.01 返回 [`SamplerError::NotNormalized`]，原始权重请使用 [`Self::from_weights`]。
    pub fn build(distribution: &[f64]) -> Result<Self, SamplerError> {
        let sum = validate(distribution)?;
        if (sum - 1.0).abs() > NORMALIZATION_TOLERANCE {
            return Err(SamplerError::NotNormalized { sum });
        }
        Ok(Self::vose(distribution))
    }

    /// 由原始权重构造采样器。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：名字树中的权重是任意非负实数，需要先归一化；
    /// - **执行 (How)**：逐项除以总和；若总和恰为 0，则退化为均匀分布；
    /// - **契约 (What)**：全零权重是刻意的退化策略而非错误，每一项都将等概率被选中。
    pub fn from_weights(weights: &[f64]) -> Result<Self, SamplerError> {
        let sum = validate(weights)?;
        if !sum.is_finite() {
            return Err(SamplerError::NonFiniteSum);
        }

        let n = weights.len();
        let distribution: Vec<f64> = if sum == 0.0 {
            vec![1.0 / n as f64; n]
        } else {
            weights.iter().map(|weight| weight / sum).collect()
        };
        Ok(Self::vose(&distribution))
    }

    fn vose(distribution: &[f64]) -> Self {
        let n = distribution.len();
        let mut probability = vec![1.0; n];
        let mut alias: Vec<usize> = (0..n).collect();

        let mut scaled: Vec<f64> = distribution.iter().map(|p| p * n as f64).collect();
        let mut small = VecDeque::with_capacity(n);
        let mut large = VecDeque::with_capacity(n);
        for (index, p) in scaled.iter().enumerate() {
            if *p < 1.0 {
                small.push_back(index);
            } else {
                large.push_back(index);
            }
        }

        while !small.is_empty() && !large.is_empty() {
            let (Some(s), Some(l)) = (small.pop_front(), large.pop_front()) else {
                break;
            };
            probability[s] = scaled[s];
            alias[s] = l;
            // p(s) + p(l) - 1 而非 p(l) - (1 - p(s))，后者会累积抵消误差。
            scaled[l] = (scaled[s] + scaled[l]) - 1.0;
            if scaled[l] < 1.0 {
                small.push_back(l);
            } else {
                large.push_back(l);
            }
        }

        // 剩余项理论上都应恰好为 1，浮点误差留下的尾巴统一按 1 处理。
        for index in large.into_iter().chain(small) {
            probability[index] = 1.0;
        }

        Self {
            probability: probability.into_boxed_slice(),
            alias: alias.into_boxed_slice(),
        }
    }

    /// 抽取一个下标，O(1)。
    pub fn sample<R>(&self, rng: &mut R) -> usize
    where
        R: Rng + ?Sized,
    {
        let index = rng.random_range(0..self.probability.len());
        let p = self.probability[index];
        if p >= 1.0 || rng.random::<f64>() < p {
            index
        } else {
            self.alias[index]
        }
    }

    /// 分布中的项数，恒大于 0。
    pub fn len(&self) -> usize {
        self.probability.len()
    }

    /// 构造成功的采样器永不为空，保留该方法以符合集合类 API 习惯。
    pub fn is_empty(&self) -> bool {
        self.probability.is_empty()
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probability
    }

    pub fn aliases(&self) -> &[usize] {
        &self.alias
    }
}

fn validate(weights: &[f64]) -> Result<f64, SamplerError> {
    if weights.is_empty() {
        return Err(SamplerError::EmptyDistribution);
    }
    let mut sum = 0.0;
    for (index, &weight) in weights.iter().enumerate() {
        if !weight.is_finite() || weight < 0.0 {
            return Err(SamplerError::InvalidWeight { index, weight });
        }
        sum += weight;
    }
    Ok(sum)
}
