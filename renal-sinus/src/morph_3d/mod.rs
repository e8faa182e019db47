//! 3D 二值形态学操作.
//!
//! 所有操作都以 `(z, H, W)` 组织的 [`Mask3d`] 为输入, 数据范围外的体素一律视为背景.

use std::collections::VecDeque;

use ndarray::{Array3, ArrayBase, Data, Ix3, Zip};

use crate::{Idx3d, Mask3d};

mod hull;

pub use hull::convex_hull_3d;

/// 3D 体素邻接规则.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Connectivity {
    /// 6-邻接 (共面, 钻石型).
    Face,

    /// 18-邻接 (共面或共棱).
    Edge,

    /// 26-邻接 (共面, 共棱或共顶点). 连通域标记的默认规则.
    #[default]
    Full,
}

impl Connectivity {
    /// 该规则下的所有非零偏移量, 按 (z, H, W) 的字典序排列.
    pub fn offsets(&self) -> Vec<(isize, isize, isize)> {
        // 一个偏移量中非零分量的个数不超过该值时被视为相邻.
        let max_nonzero = match self {
            Connectivity::Face => 1,
            Connectivity::Edge => 2,
            Connectivity::Full => 3,
        };
        itertools::iproduct!(-1isize..=1, -1isize..=1, -1isize..=1)
            .filter(|&(z, h, w)| {
                let nonzero = [z, h, w].iter().filter(|v| **v != 0).count();
                (1..=max_nonzero).contains(&nonzero)
            })
            .collect()
    }
}

/// 给定偏移量, 计算 `pos` 的邻居坐标. 越界时返回 `None`.
#[inline]
fn offset_pos(
    (z, h, w): Idx3d,
    (dz, dh, dw): (isize, isize, isize),
    shape: Idx3d,
) -> Option<Idx3d> {
    let z = z.checked_add_signed(dz).filter(|v| *v < shape.0)?;
    let h = h.checked_add_signed(dh).filter(|v| *v < shape.1)?;
    let w = w.checked_add_signed(dw).filter(|v| *v < shape.2)?;
    Some((z, h, w))
}

/// 连通域标记结果.
///
/// 背景的标记为 0, 连通域标记依次为 `1..=K`, 按每个连通域中第一个体素的行优先序分配.
#[derive(Clone, Debug)]
pub struct Components {
    labels: Array3<u32>,
    sizes: Vec<usize>,
}

impl Components {
    /// 连通域个数 `K`.
    #[inline]
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// 是否不存在任何连通域?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// 获取底层标记数组的不可变引用.
    #[inline]
    pub fn labels(&self) -> &Array3<u32> {
        &self.labels
    }

    /// 获取标记为 `id` 的连通域体素个数. `id` 为 0 或越界时返回 `None`.
    #[inline]
    pub fn size_of(&self, id: u32) -> Option<usize> {
        (id as usize)
            .checked_sub(1)
            .and_then(|i| self.sizes.get(i).copied())
    }

    /// 按 `1..=K` 顺序获取每个连通域的体素个数.
    #[inline]
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// 按体素个数升序排列的连通域标记. 体素个数相同时按标记升序 (稳定排序).
    pub fn ranking(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = (1..=self.sizes.len() as u32).collect();
        ids.sort_by_key(|&id| self.sizes[id as usize - 1]);
        ids
    }

    /// 体素个数最多的连通域标记. 若有多个, 取标记最小者. 不存在连通域时返回 `None`.
    pub fn largest(&self) -> Option<u32> {
        let mut best: Option<(u32, usize)> = None;
        for (i, &size) in self.sizes.iter().enumerate() {
            if best.map_or(true, |(_, s)| size > s) {
                best = Some((i as u32 + 1, size));
            }
        }
        best.map(|(id, _)| id)
    }

    /// 生成标记为 `id` 的连通域二值掩膜.
    pub fn mask_of(&self, id: u32) -> Mask3d {
        self.labels.map(|&l| l == id)
    }
}

/// 以 `conn` 规则标记二值掩膜 `mask` 的所有前景连通域.
///
/// 按行优先序扫描, 对每个尚未标记的前景体素做一次 BFS.
pub fn label_components<S>(mask: &ArrayBase<S, Ix3>, conn: Connectivity) -> Components
where
    S: Data<Elem = bool>,
{
    let shape = mask.dim();
    let offsets = conn.offsets();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut sizes = Vec::new();
    let mut bfs_q = VecDeque::with_capacity(64);

    for (pos, &fg) in mask.indexed_iter() {
        if !fg || labels[pos] != 0 {
            continue;
        }
        let id = sizes.len() as u32 + 1;
        labels[pos] = id;
        bfs_q.push_back(pos);
        let mut size = 0usize;

        while let Some(cur) = bfs_q.pop_front() {
            size += 1;
            for &d in offsets.iter() {
                let Some(next) = offset_pos(cur, d, shape) else {
                    continue;
                };
                if mask[next] && labels[next] == 0 {
                    labels[next] = id;
                    bfs_q.push_back(next);
                }
            }
        }
        sizes.push(size);
    }

    Components { labels, sizes }
}

/// 保留二值掩膜 `mask` 中体素个数最多的连通域 (规则 `conn`).
///
/// 如果 `mask` 为全背景, 则原样返回其拷贝. 若多个连通域同为最大,
/// 保留行优先序下最先出现的那个.
pub fn largest_component<S>(mask: &ArrayBase<S, Ix3>, conn: Connectivity) -> Mask3d
where
    S: Data<Elem = bool>,
{
    let components = label_components(mask, conn);
    match components.largest() {
        Some(id) => components.mask_of(id),
        None => mask.to_owned(),
    }
}

/// 二值腐蚀. 结构元为 6-邻接十字 (含中心), 迭代 `iterations` 次.
///
/// 数据范围外的体素视为背景, 因此贴边的前景体素在第一次迭代就会被腐蚀.
/// 当 `iterations` 为 0 时原样返回拷贝.
pub fn binary_erosion<S>(mask: &ArrayBase<S, Ix3>, iterations: usize) -> Mask3d
where
    S: Data<Elem = bool>,
{
    let shape = mask.dim();
    let offsets = Connectivity::Face.offsets();
    let mut cur = mask.to_owned();

    for _ in 0..iterations {
        let prev = cur.clone();
        Zip::indexed(&mut cur).for_each(|pos, v| {
            if *v {
                *v = offsets
                    .iter()
                    .all(|&d| offset_pos(pos, d, shape).is_some_and(|p| prev[p]));
            }
        });
    }
    cur
}

/// 统计掩膜前景体素个数.
#[inline]
pub fn count_foreground<S>(mask: &ArrayBase<S, Ix3>) -> usize
where
    S: Data<Elem = bool>,
{
    mask.iter().filter(|m| **m).count()
}

/// 两个同形状掩膜的逐体素或运算, 结果写回 `lhs`.
///
/// 形状不一致时 panic.
pub fn union_assign<S>(lhs: &mut Mask3d, rhs: &ArrayBase<S, Ix3>)
where
    S: Data<Elem = bool>,
{
    Zip::from(lhs).and(rhs).for_each(|l, &r| *l |= r);
}

/// 两个同形状掩膜的逐体素与运算, 结果写回 `lhs`.
///
/// 形状不一致时 panic.
pub fn intersect_assign<S>(lhs: &mut Mask3d, rhs: &ArrayBase<S, Ix3>)
where
    S: Data<Elem = bool>,
{
    Zip::from(lhs).and(rhs).for_each(|l, &r| *l &= r);
}
