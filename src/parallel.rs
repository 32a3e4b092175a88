//! 按 grid 行并行的辅助函数
//!
//! grain 为 0 时在当前线程执行, 否则交给全局 rayon 线程池, 每个任务至少 `grain` 行.
//! 各任务的行互不重叠.

use std::ops::Range;

use rayon::prelude::*;

use crate::grid::Grid2D;

/// 带 grain 的左闭右开区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockedRange {
    pub begin: usize,
    pub end: usize,
    pub grain: usize,
}

impl BlockedRange {
    pub fn new(begin: usize, end: usize, grain: usize) -> Self {
        assert!(begin <= end, "range begin {begin} > end {end}");
        Self { begin, end, grain }
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn is_sequential(&self) -> bool {
        self.grain == 0 || self.len() <= self.grain
    }

    /// 切成连续的块, 每块最多 `grain` 个下标
    pub fn chunks(&self) -> Vec<Range<usize>> {
        if self.is_empty() {
            return Vec::new();
        }
        let step = self.grain.max(1);
        (self.begin..self.end)
            .step_by(step)
            .map(|s| s..(s + step).min(self.end))
            .collect()
    }
}

/// 对 `grid` 每一行调用 `f(row, cells)`, 返回结果之和
pub fn parallel_for_rows<T, F>(grid: &mut Grid2D<T>, grain: usize, f: F) -> usize
where
    T: Send,
    F: Fn(usize, &mut [T]) -> usize + Sync + Send,
{
    let cols = grid.cols();
    if grid.is_empty() || cols == 0 {
        return 0;
    }

    if grain == 0 {
        grid.as_mut_slice()
            .chunks_mut(cols)
            .enumerate()
            .map(|(r, row)| f(r, row))
            .sum()
    } else {
        grid.as_mut_slice()
            .par_chunks_mut(cols)
            .with_min_len(grain)
            .enumerate()
            .map(|(r, row)| f(r, row))
            .sum()
    }
}

/// 对 `range` 的每块调用 `map`, 再用 `reduce` 合并
pub fn parallel_reduce<T, M, R>(range: BlockedRange, identity: T, map: M, reduce: R) -> T
where
    T: Send + Sync + Clone,
    M: Fn(Range<usize>) -> T + Sync + Send,
    R: Fn(T, T) -> T + Sync + Send,
{
    if range.is_empty() {
        return identity;
    }
    if range.is_sequential() {
        return reduce(identity, map(range.begin..range.end));
    }
    range
        .chunks()
        .into_par_iter()
        .map(&map)
        .reduce(|| identity.clone(), &reduce)
}

/// 配置全局 rayon 线程池, 已经建立时返回错误
pub fn init_thread_pool(num_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks() {
        let range = BlockedRange::new(2, 9, 3);
        assert_eq!(range.chunks(), vec![2..5, 5..8, 8..9]);
        assert!(BlockedRange::new(4, 4, 2).chunks().is_empty());
        assert!(BlockedRange::new(0, 5, 0).is_sequential());
    }

    #[test]
    fn test_for_rows_sequential_equals_parallel() {
        let fill = |grain: usize| {
            let mut grid = Grid2D::new(37, 11, 0usize);
            let n = parallel_for_rows(&mut grid, grain, |r, row| {
                for (c, v) in row.iter_mut().enumerate() {
                    *v = r * 100 + c;
                }
                row.iter().filter(|&&v| v % 2 == 0).count()
            });
            (n, grid)
        };
        let (n0, g0) = fill(0);
        let (n1, g1) = fill(1);
        let (n4, g4) = fill(4);
        assert_eq!(n0, n1);
        assert_eq!(n0, n4);
        assert_eq!(g0, g1);
        assert_eq!(g0, g4);
        assert_eq!(g0[(3, 5)], 305);
    }

    #[test]
    fn test_reduce_sum() {
        let sum = |grain| {
            parallel_reduce(
                BlockedRange::new(0, 1000, grain),
                0u64,
                |r| r.map(|i| i as u64).sum(),
                |a, b| a + b,
            )
        };
        assert_eq!(sum(0), 499500);
        assert_eq!(sum(7), 499500);
        assert_eq!(sum(2000), 499500);
    }
}
