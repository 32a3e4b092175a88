//! 行优先的稠密 grid
//!
//! 用于存放选中像素, 梯度候选, patch 和深度点. 每个选点 cell 一格,
//! 按 `(row, col)` 或展平下标访问.

use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GridSize {
    pub rows: usize,
    pub cols: usize,
}

impl GridSize {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.rows * self.cols
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grid2D<T> {
    size: GridSize,
    data: Vec<T>,
}

impl<T> Default for Grid2D<T> {
    fn default() -> Self {
        Self {
            size: GridSize::default(),
            data: Vec::new(),
        }
    }
}

impl<T: Clone> Grid2D<T> {
    pub fn new(rows: usize, cols: usize, val: T) -> Self {
        Self::with_size(GridSize::new(rows, cols), val)
    }

    pub fn with_size(size: GridSize, val: T) -> Self {
        Self {
            size,
            data: vec![val; size.area()],
        }
    }

    /// 所有格子置为 `val`, 尺寸不变
    pub fn reset(&mut self, val: T) {
        self.data.fill(val);
    }

    /// 修改尺寸, 所有格子重新置为 `val`
    pub fn resize(&mut self, size: GridSize, val: T) {
        self.size = size;
        self.data.clear();
        self.data.resize(size.area(), val);
    }
}

impl<T> Grid2D<T> {
    #[inline]
    pub fn rc2ind(&self, r: usize, c: usize) -> usize {
        assert!(
            r < self.size.rows && c < self.size.cols,
            "grid index ({r}, {c}) out of {}x{}",
            self.size.rows,
            self.size.cols
        );
        r * self.size.cols + c
    }

    #[inline]
    pub fn at(&self, r: usize, c: usize) -> &T {
        &self.data[self.rc2ind(r, c)]
    }

    #[inline]
    pub fn at_mut(&mut self, r: usize, c: usize) -> &mut T {
        let i = self.rc2ind(r, c);
        &mut self.data[i]
    }

    pub fn size(&self) -> GridSize {
        self.size
    }
    pub fn rows(&self) -> usize {
        self.size.rows
    }
    pub fn cols(&self) -> usize {
        self.size.cols
    }
    pub fn area(&self) -> usize {
        self.size.area()
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn row(&self, r: usize) -> &[T] {
        let begin = self.rc2ind(r, 0);
        &self.data[begin..begin + self.size.cols]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }

    /// 格子占用的字节数
    pub fn bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
    }
}

impl<T> Index<usize> for Grid2D<T> {
    type Output = T;
    fn index(&self, i: usize) -> &T {
        &self.data[i]
    }
}

impl<T> IndexMut<usize> for Grid2D<T> {
    fn index_mut(&mut self, i: usize) -> &mut T {
        &mut self.data[i]
    }
}

impl<T> Index<(usize, usize)> for Grid2D<T> {
    type Output = T;
    fn index(&self, (r, c): (usize, usize)) -> &T {
        self.at(r, c)
    }
}

impl<T> IndexMut<(usize, usize)> for Grid2D<T> {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut T {
        self.at_mut(r, c)
    }
}

impl<'a, T> IntoIterator for &'a Grid2D<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rc2ind_row_major() {
        let grid = Grid2D::new(3, 4, 0u8);
        assert_eq!(grid.rc2ind(0, 0), 0);
        assert_eq!(grid.rc2ind(1, 0), 4);
        assert_eq!(grid.rc2ind(2, 3), 11);
        assert_eq!(grid.area(), 12);
    }

    #[test]
    fn test_index_and_reset() {
        let mut grid = Grid2D::new(2, 2, 1i32);
        grid[(1, 0)] = 5;
        assert_eq!(grid[2], 5);
        assert_eq!(*grid.at(1, 0), 5);
        grid.reset(-1);
        assert!(grid.iter().all(|&v| v == -1));
    }

    #[test]
    fn test_resize_reinitializes() {
        let mut grid = Grid2D::new(2, 3, 7u16);
        grid[(0, 1)] = 9;
        grid.resize(GridSize::new(3, 3), 2);
        assert_eq!(grid.size(), GridSize::new(3, 3));
        assert!(grid.iter().all(|&v| v == 2));
        assert_eq!(grid.bytes(), 9 * 2);
    }

    #[test]
    fn test_row_slice() {
        let mut grid = Grid2D::new(2, 3, 0);
        grid[(1, 2)] = 3;
        assert_eq!(grid.row(1), &[0, 0, 3]);
    }

    #[test]
    #[should_panic]
    fn test_col_out_of_range_panics() {
        let grid = Grid2D::new(2, 2, 0);
        let _ = grid.at(0, 2);
    }
}
