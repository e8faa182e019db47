//! 三维轴对齐包围盒.

use std::ops::Range;

use itertools::{Itertools, MinMaxResult};
use ndarray::{s, ArrayBase, ArrayView3, ArrayViewMut3, Data, DataMut, Ix3};

use crate::Idx3d;

/// 三维轴对齐包围盒. 下界 `lower` 为闭区间端点, 上界 `upper` 为开区间端点,
/// 即覆盖 `lower.i <= idx.i < upper.i` 的所有体素.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BoundingBox {
    lower: Idx3d,
    upper: Idx3d,
}

impl BoundingBox {
    /// 直接创建包围盒. 若任一维度上 `lower > upper`, 则返回 `None`.
    pub fn new(lower: Idx3d, upper: Idx3d) -> Option<Self> {
        (lower.0 <= upper.0 && lower.1 <= upper.1 && lower.2 <= upper.2)
            .then_some(Self { lower, upper })
    }

    /// 计算二值掩膜 `mask` 中所有前景体素的最紧包围盒.
    /// 如果不存在前景, 则返回 `None`.
    pub fn of_mask<S: Data<Elem = bool>>(mask: &ArrayBase<S, Ix3>) -> Option<Self> {
        Self::of_positions(
            mask.indexed_iter()
                .filter_map(|(pos, &m)| m.then_some(pos)),
        )
    }

    /// 计算一组索引的最紧包围盒. 如果 `it` 为空, 则返回 `None`.
    pub fn of_positions<I: IntoIterator<Item = Idx3d>>(it: I) -> Option<Self> {
        let positions: Vec<Idx3d> = it.into_iter().collect();

        #[inline]
        fn axis_range(r: MinMaxResult<usize>) -> Option<(usize, usize)> {
            match r {
                MinMaxResult::NoElements => None,
                MinMaxResult::OneElement(v) => Some((v, v + 1)),
                MinMaxResult::MinMax(lo, hi) => Some((lo, hi + 1)),
            }
        }

        let (z0, z1) = axis_range(positions.iter().map(|p| p.0).minmax())?;
        let (h0, h1) = axis_range(positions.iter().map(|p| p.1).minmax())?;
        let (w0, w1) = axis_range(positions.iter().map(|p| p.2).minmax())?;
        Some(Self {
            lower: (z0, h0, w0),
            upper: (z1, h1, w1),
        })
    }

    /// 以 `margin` 为边距向外扩展包围盒, 并裁剪到形状为 `shape` 的数据范围内.
    ///
    /// 下界为 `max(min - margin, 0)`, 上界 (开) 为 `min(max + margin, shape)`,
    /// 其中 `min`, `max` 为前景体素的最小/最大索引. 结果永远不会越界.
    pub fn expand_clamped(&self, margin: usize, shape: Idx3d) -> Self {
        // `self.upper` 是开区间端点, 对应的最大索引为 `upper - 1`.
        let lo = |v: usize| v.saturating_sub(margin);
        let hi = |v: usize, len: usize| (v.saturating_sub(1) + margin).min(len);
        let lower = (lo(self.lower.0), lo(self.lower.1), lo(self.lower.2));
        let upper = (
            hi(self.upper.0, shape.0).max(lower.0),
            hi(self.upper.1, shape.1).max(lower.1),
            hi(self.upper.2, shape.2).max(lower.2),
        );
        Self { lower, upper }
    }

    /// 下界 (闭).
    #[inline]
    pub fn lower(&self) -> Idx3d {
        self.lower
    }

    /// 上界 (开).
    #[inline]
    pub fn upper(&self) -> Idx3d {
        self.upper
    }

    /// 包围盒的形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        (
            self.upper.0 - self.lower.0,
            self.upper.1 - self.lower.1,
            self.upper.2 - self.lower.2,
        )
    }

    /// 包围盒是否不含任何体素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        let (z, h, w) = self.shape();
        z == 0 || h == 0 || w == 0
    }

    /// 包围盒在三个维度上的索引范围.
    #[inline]
    pub fn ranges(&self) -> [Range<usize>; 3] {
        [
            self.lower.0..self.upper.0,
            self.lower.1..self.upper.1,
            self.lower.2..self.upper.2,
        ]
    }

    /// 判断包围盒是否完全位于形状为 `shape` 的数据范围内.
    #[inline]
    pub fn fits_in(&self, shape: Idx3d) -> bool {
        self.upper.0 <= shape.0 && self.upper.1 <= shape.1 && self.upper.2 <= shape.2
    }

    /// 获取 `data` 在包围盒内的不可变视图. 包围盒越界时 panic.
    pub fn crop<'a, A, S>(&self, data: &'a ArrayBase<S, Ix3>) -> ArrayView3<'a, A>
    where
        S: Data<Elem = A>,
    {
        let [z, h, w] = self.ranges();
        data.slice(s![z, h, w])
    }

    /// 获取 `data` 在包围盒内的可变视图. 包围盒越界时 panic.
    pub fn crop_mut<'a, A, S>(&self, data: &'a mut ArrayBase<S, Ix3>) -> ArrayViewMut3<'a, A>
    where
        S: DataMut<Elem = A>,
    {
        let [z, h, w] = self.ranges();
        data.slice_mut(s![z, h, w])
    }
}

#[cfg(test)]
mod tests {
    use super::BoundingBox;
    use ndarray::Array3;

    #[test]
    fn test_bbox_of_mask() {
        let mut mask = Array3::from_elem((6, 7, 8), false);
        assert_eq!(BoundingBox::of_mask(&mask), None);

        mask[(2, 3, 4)] = true;
        let b = BoundingBox::of_mask(&mask).unwrap();
        assert_eq!(b.lower(), (2, 3, 4));
        assert_eq!(b.upper(), (3, 4, 5));
        assert_eq!(b.shape(), (1, 1, 1));

        mask[(4, 1, 6)] = true;
        let b = BoundingBox::of_mask(&mask).unwrap();
        assert_eq!(b.lower(), (2, 1, 4));
        assert_eq!(b.upper(), (5, 4, 7));
    }

    #[test]
    fn test_expand_clamped_inside() {
        // 前景索引范围 [20, 30] 的立方体.
        let b = BoundingBox::new((20, 20, 20), (31, 31, 31)).unwrap();
        let e = b.expand_clamped(5, (100, 100, 100));
        assert_eq!(e.lower(), (15, 15, 15));
        // 与 `max + 5` 的开区间上界一致.
        assert_eq!(e.upper(), (35, 35, 35));
    }

    #[test]
    fn test_expand_clamped_at_border() {
        let shape = (10, 12, 14);
        let b = BoundingBox::new((0, 2, 11), (3, 12, 14)).unwrap();
        let e = b.expand_clamped(5, shape);
        assert_eq!(e.lower(), (0, 0, 6));
        assert_eq!(e.upper(), (7, 12, 14));
        assert!(e.fits_in(shape));

        let data = Array3::<u8>::zeros(shape);
        assert_eq!(e.crop(&data).dim(), e.shape());
    }
}
