//! 3D 二值凸包.
//!
//! 每个前景体素以其中心沿三个坐标轴各偏移半个体素得到 6 个钻石型顶点,
//! 所有顶点的凸包在网格上栅格化, 中心落在凸包内 (含边界) 的体素即为结果前景.
//!
//! 为了避免浮点误差, 所有坐标都放大两倍后以 `i64` 精确计算.

use std::collections::HashSet;

use ndarray::{Array3, ArrayBase, Axis, Data, Ix3, Zip};

use crate::Mask3d;

/// 放大两倍后的整数坐标, 顺序为 (z, H, W).
type P3 = [i64; 3];

#[inline]
fn sub(a: P3, b: P3) -> P3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(a: P3, b: P3) -> P3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn dot(a: P3, b: P3) -> i64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// 凸包的一个三角面. 外法向量 `normal` 满足: 凸包内的点 `p` 均有 `normal · p <= offset`.
#[derive(Copy, Clone, Debug)]
struct Face {
    v: [usize; 3],
    normal: P3,
    offset: i64,
}

impl Face {
    /// 由逆时针 (从外侧看) 排列的三个顶点创建三角面.
    fn new(pts: &[P3], v: [usize; 3]) -> Self {
        let [a, b, c] = v.map(|i| pts[i]);
        let normal = cross(sub(b, a), sub(c, a));
        Self {
            v,
            normal,
            offset: dot(normal, a),
        }
    }

    /// 创建三角面, 并保证 `inner` 位于其内侧.
    fn facing_away(pts: &[P3], [a, b, c]: [usize; 3], inner: usize) -> Self {
        let f = Self::new(pts, [a, b, c]);
        if f.is_visible_from(pts[inner]) {
            Self::new(pts, [a, c, b])
        } else {
            f
        }
    }

    /// `p` 是否严格位于该面的外侧?
    #[inline]
    fn is_visible_from(&self, p: P3) -> bool {
        dot(self.normal, p) > self.offset
    }

    #[inline]
    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.v;
        [(a, b), (b, c), (c, a)]
    }
}

/// 标记 `mask` 在 `axis` 方向上每条扫描线的首尾前景体素.
fn line_ends<S: Data<Elem = bool>>(mask: &ArrayBase<S, Ix3>, axis: usize) -> Mask3d {
    let mut ends = Array3::from_elem(mask.dim(), false);
    for (mut out, lane) in ends
        .lanes_mut(Axis(axis))
        .into_iter()
        .zip(mask.lanes(Axis(axis)))
    {
        let first = lane.iter().position(|m| *m);
        let last = lane.iter().rposition(|m| *m);
        if let (Some(first), Some(last)) = (first, last) {
            out[first] = true;
            out[last] = true;
        }
    }
    ends
}

/// 收集可能成为凸包顶点的钻石型顶点 (放大两倍的坐标), 已去重并排序.
///
/// 若某体素在任一坐标轴方向上不是其扫描线的首尾前景, 则它的 6 个顶点都严格位于同线两个
/// 首尾体素顶点的连线上, 不可能是凸包顶点. 因此只需考虑三个方向上都处于首尾的体素.
fn candidate_points<S: Data<Elem = bool>>(mask: &ArrayBase<S, Ix3>) -> Vec<P3> {
    let mut keep = line_ends(mask, 0);
    let ends_h = line_ends(mask, 1);
    let ends_w = line_ends(mask, 2);
    Zip::from(&mut keep)
        .and(&ends_h)
        .and(&ends_w)
        .for_each(|k, &h, &w| *k = *k && h && w);

    const DIAMOND: [P3; 6] = [
        [-1, 0, 0],
        [1, 0, 0],
        [0, -1, 0],
        [0, 1, 0],
        [0, 0, -1],
        [0, 0, 1],
    ];

    let mut set = HashSet::new();
    for ((z, h, w), _) in keep.indexed_iter().filter(|(_, k)| **k) {
        let center = [2 * z as i64, 2 * h as i64, 2 * w as i64];
        for d in DIAMOND.iter() {
            set.insert([center[0] + d[0], center[1] + d[1], center[2] + d[2]]);
        }
    }
    let mut pts: Vec<P3> = set.into_iter().collect();
    pts.sort_unstable();
    pts
}

/// 寻找 4 个不共面的点作为初始四面体. 不存在时返回 `None`.
fn initial_simplex(pts: &[P3]) -> Option<[usize; 4]> {
    let p0 = 0;
    let p1 = (1..pts.len()).find(|&i| pts[i] != pts[p0])?;
    let e1 = sub(pts[p1], pts[p0]);
    let p2 = (1..pts.len()).find(|&i| cross(e1, sub(pts[i], pts[p0])) != [0; 3])?;
    let n = cross(e1, sub(pts[p2], pts[p0]));
    let p3 = (1..pts.len()).find(|&i| dot(n, sub(pts[i], pts[p0])) != 0)?;
    Some([p0, p1, p2, p3])
}

/// 增量法构建凸包, 返回所有三角面.
///
/// 只有严格位于某面外侧的点才会扩展凸包, 共面点被忽略; 因此结果可能包含共面的相邻面,
/// 这不影响后续的内外判定.
fn build_hull(pts: &[P3]) -> Option<Vec<Face>> {
    let [a, b, c, d] = initial_simplex(pts)?;
    let mut faces = vec![
        Face::facing_away(pts, [a, b, c], d),
        Face::facing_away(pts, [a, b, d], c),
        Face::facing_away(pts, [a, c, d], b),
        Face::facing_away(pts, [b, c, d], a),
    ];

    let mut visible_edges = HashSet::new();
    for (i, &p) in pts.iter().enumerate() {
        if [a, b, c, d].contains(&i) {
            continue;
        }
        if !faces.iter().any(|f| f.is_visible_from(p)) {
            continue;
        }

        visible_edges.clear();
        faces.retain(|f| {
            let visible = f.is_visible_from(p);
            if visible {
                visible_edges.extend(f.edges());
            }
            !visible
        });

        // 地平线: 可见面的边中, 反向边不属于任何可见面的那些.
        let horizon: Vec<(usize, usize)> = visible_edges
            .iter()
            .filter(|(u, v)| !visible_edges.contains(&(*v, *u)))
            .copied()
            .collect();
        faces.extend(horizon.into_iter().map(|(u, v)| Face::new(pts, [u, v, i])));
    }
    Some(faces)
}

/// 计算二值掩膜 `mask` 的 3D 凸包掩膜.
///
/// 体素中心落在凸包内部或边界上的即为前景. 原前景体素一定在结果中.
/// 如果 `mask` 为全背景, 则返回全背景掩膜.
pub fn convex_hull_3d<S: Data<Elem = bool>>(mask: &ArrayBase<S, Ix3>) -> Mask3d {
    let shape = mask.dim();
    let pts = candidate_points(mask);
    if pts.is_empty() {
        return Array3::from_elem(shape, false);
    }
    // 非空掩膜的钻石型顶点集一定是三维的, 这里只是兜底.
    let Some(faces) = build_hull(&pts) else {
        return mask.to_owned();
    };

    // 凸包在 (z, H) 上的范围. 放大两倍的坐标经过 `(v + 1) / 2` 换算回体素索引.
    let bound = |k: usize| {
        let lo = pts.iter().map(|p| p[k]).min().unwrap_or(0);
        let hi = pts.iter().map(|p| p[k]).max().unwrap_or(0);
        (((lo + 1) / 2).max(0) as usize, (hi / 2).max(0) as usize)
    };
    let (z_lo, z_hi) = bound(0);
    let (h_lo, h_hi) = bound(1);

    let mut out = Array3::from_elem(shape, false);
    for z in z_lo..=z_hi.min(shape.0 - 1) {
        for h in h_lo..=h_hi.min(shape.1 - 1) {
            if let Some((w_lo, w_hi)) = scanline(&faces, z, h, shape.2) {
                for w in w_lo..=w_hi {
                    out[(z, h, w)] = true;
                }
            }
        }
    }
    out
}

/// 求扫描线 `(z, h, *)` 上落在凸包内的体素索引闭区间. 为空时返回 `None`.
fn scanline(faces: &[Face], z: usize, h: usize, len_w: usize) -> Option<(usize, usize)> {
    let (z2, h2) = (2 * z as i64, 2 * h as i64);
    let mut lo = 0i64;
    let mut hi = len_w as i64 - 1;

    for f in faces {
        let [nz, nh, nw] = f.normal;
        // 约束: nw * 2w <= rhs.
        let rhs = f.offset - nz * z2 - nh * h2;
        match nw.signum() {
            0 if rhs < 0 => return None,
            0 => {}
            1 => hi = hi.min(rhs.div_euclid(2 * nw)),
            _ => lo = lo.max(-rhs.div_euclid(-2 * nw)),
        }
        if lo > hi {
            return None;
        }
    }
    Some((lo as usize, hi as usize))
}
