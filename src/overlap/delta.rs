//! Reduction rules applied when overlap-space values travel back to the rank
//! owning their native entity.
//!
//! Several overlap entries may alias one native destination (a vertex shared
//! by ghost cells on two ranks, say). The rule decides how those meet.

/// *Delta* encapsulates restriction & fusion for a transferred value `V`.
pub trait Delta<V>: Sized {
    /// What travels on the wire (often identical to `V`).
    type Part: Send;

    /// Extract the part of `v` that is sent to the owner.
    fn restrict(v: &V) -> Self::Part;

    /// Merge an incoming contribution into the destination value.
    fn fuse(local: &mut V, incoming: Self::Part);
}

/// Overwrite: the last contribution wins. Only meaningful when no aliasing
/// occurs or all aliases carry the same value.
#[derive(Copy, Clone, Debug, Default)]
pub struct CopyDelta;

impl<V: Copy + Send> Delta<V> for CopyDelta {
    type Part = V;
    #[inline]
    fn restrict(v: &V) -> V {
        *v
    }
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local = incoming;
    }
}

/// Accumulate: every contribution is added, so aliased entries sum up.
#[derive(Copy, Clone, Debug, Default)]
pub struct AddDelta;

impl<V> Delta<V> for AddDelta
where
    V: std::ops::AddAssign + Copy + Send,
{
    type Part = V;
    #[inline]
    fn restrict(v: &V) -> V {
        *v
    }
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local += incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates_and_copy_overwrites() {
        let mut v = 1.5f64;
        AddDelta::fuse(&mut v, AddDelta::restrict(&2.0));
        assert_eq!(v, 3.5);
        CopyDelta::fuse(&mut v, CopyDelta::restrict(&-1.0));
        assert_eq!(v, -1.0);
    }
}
