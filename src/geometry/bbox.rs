//! Axis-aligned bounding boxes.
//!
//! Boxes are closed: touching boxes intersect. Global per-cell boxes are kept
//! in `f32` to halve the all-reduce volume; patch boxes and geometry use `f64`.

/// Axis-aligned box in `S` dimensions with coordinate type `T`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox<const S: usize, T = f64> {
    pub lower: [T; S],
    pub upper: [T; S],
}

impl<const S: usize, T> BoundingBox<S, T>
where
    T: Copy + PartialOrd + Into<f64>,
{
    pub fn new(lower: [T; S], upper: [T; S]) -> Self {
        Self { lower, upper }
    }

    /// Closed intersection test, per axis: either bound of `other` lies in
    /// `self`, or `self` starts inside `other`.
    pub fn intersects<U>(&self, other: &BoundingBox<S, U>) -> bool
    where
        U: Copy + Into<f64>,
    {
        (0..S).all(|d| {
            let (a_lo, a_hi) = (self.lower[d].into(), self.upper[d].into());
            let (b_lo, b_hi) = (other.lower[d].into(), other.upper[d].into());
            let inside_a = |x: f64| a_lo <= x && x <= a_hi;
            inside_a(b_lo) || inside_a(b_hi) || (b_lo <= a_lo && a_lo <= b_hi)
        })
    }

    /// True if `p` lies in the closed box.
    pub fn contains_point(&self, p: &[f64; S]) -> bool {
        (0..S).all(|d| self.lower[d].into() <= p[d] && p[d] <= self.upper[d].into())
    }

    /// Product of the side lengths; zero or negative for degenerate boxes.
    pub fn volume(&self) -> f64 {
        (0..S)
            .map(|d| self.upper[d].into() - self.lower[d].into())
            .product()
    }

    pub fn center(&self) -> [f64; S] {
        std::array::from_fn(|d| 0.5 * (self.lower[d].into() + self.upper[d].into()))
    }
}

impl<const S: usize> BoundingBox<S, f64> {
    /// Smallest box containing all `points`, or `None` if there are none.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a [f64; S]>,
    {
        let mut it = points.into_iter();
        let first = *it.next()?;
        let mut bbox = Self::new(first, first);
        for p in it {
            bbox.include(p);
        }
        Some(bbox)
    }

    pub fn include(&mut self, p: &[f64; S]) {
        for d in 0..S {
            self.lower[d] = self.lower[d].min(p[d]);
            self.upper[d] = self.upper[d].max(p[d]);
        }
    }

    /// Grow every side by `amount[d]` on both ends.
    pub fn extend(&mut self, amount: &[f64; S]) {
        for d in 0..S {
            self.lower[d] -= amount[d];
            self.upper[d] += amount[d];
        }
    }

    /// Round outward to single precision so the `f32` box still contains
    /// the `f64` one.
    pub fn to_f32(&self) -> BoundingBox<S, f32> {
        let down = |x: f64| {
            let y = x as f32;
            if f64::from(y) > x { -step_up(-y) } else { y }
        };
        let up = |x: f64| {
            let y = x as f32;
            if f64::from(y) < x { step_up(y) } else { y }
        };
        BoundingBox {
            lower: std::array::from_fn(|d| down(self.lower[d])),
            upper: std::array::from_fn(|d| up(self.upper[d])),
        }
    }
}

// next representable f32 towards +inf
fn step_up(y: f32) -> f32 {
    if y.is_nan() || y == f32::INFINITY {
        return y;
    }
    if y == 0.0 {
        return f32::from_bits(1);
    }
    let bits = y.to_bits();
    if y > 0.0 {
        f32::from_bits(bits + 1)
    } else {
        f32::from_bits(bits - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit_cube() -> BoundingBox<3> {
        BoundingBox::new([0.0; 3], [1.0; 3])
    }

    fn shifted(dx: f64) -> BoundingBox<3> {
        BoundingBox::new([dx, 0.0, 0.0], [1.0 + dx, 1.0, 1.0])
    }

    #[test]
    fn disjoint_shifted_and_nested_boxes() {
        let cube = unit_cube();
        assert!(!cube.intersects(&shifted(2.0)));
        assert!(cube.intersects(&shifted(0.5)));
        let inner = BoundingBox::new([0.25; 3], [0.75; 3]);
        assert!(cube.intersects(&inner));
        assert!(inner.intersects(&cube));
    }

    #[test]
    fn touching_boxes_intersect() {
        assert!(unit_cube().intersects(&shifted(1.0)));
    }

    #[test]
    fn f32_rounding_is_outward() {
        let b = BoundingBox::new([0.1f64, -0.3], [0.7, 1.0 / 3.0]);
        let f = b.to_f32();
        for d in 0..2 {
            assert!(f64::from(f.lower[d]) <= b.lower[d]);
            assert!(f64::from(f.upper[d]) >= b.upper[d]);
        }
    }

    #[test]
    fn from_points_and_extend() {
        let pts = [[1.0, 2.0], [-1.0, 0.5], [0.0, 3.0]];
        let mut b = BoundingBox::from_points(pts.iter()).unwrap();
        assert_eq!(b.lower, [-1.0, 0.5]);
        assert_eq!(b.upper, [1.0, 3.0]);
        b.extend(&[0.5, 0.0]);
        assert_eq!(b.volume(), 3.0 * 2.5);
        assert!(BoundingBox::<2>::from_points(std::iter::empty()).is_none());
    }

    fn arb_box() -> impl Strategy<Value = BoundingBox<2>> {
        (prop::array::uniform2(-5.0f64..5.0), prop::array::uniform2(0.0f64..3.0))
            .prop_map(|(lo, len)| BoundingBox::new(lo, [lo[0] + len[0], lo[1] + len[1]]))
    }

    proptest! {
        #[test]
        fn intersection_is_symmetric(a in arb_box(), b in arb_box()) {
            prop_assert_eq!(a.intersects(&b), b.intersects(&a));
        }

        #[test]
        fn intersection_matches_interval_overlap(a in arb_box(), b in arb_box()) {
            let overlap = (0..2).all(|d| a.lower[d] <= b.upper[d] && b.lower[d] <= a.upper[d]);
            prop_assert_eq!(a.intersects(&b), overlap);
        }
    }
}
