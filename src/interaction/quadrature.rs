//! Tensor-product Gauss–Legendre rules on the unit cell `[0, 1]^DIM`, and the
//! family a per-cell quadrature index selects from.

use crate::mesh_error::MeshOverlapError;

#[derive(Clone, Debug, PartialEq)]
pub struct Quadrature<const DIM: usize> {
    points: Vec<[f64; DIM]>,
    weights: Vec<f64>,
}

impl<const DIM: usize> Quadrature<DIM> {
    /// `n` points per axis; exact for polynomials of degree `2n - 1`.
    pub fn gauss(n: usize) -> Self {
        let (x1, w1) = gauss_legendre_1d(n.max(1));
        let total = x1.len().pow(DIM as u32);
        let mut points = Vec::with_capacity(total);
        let mut weights = Vec::with_capacity(total);
        for flat in 0..total {
            let mut rest = flat;
            let mut p = [0.0; DIM];
            let mut w = 1.0;
            for pd in p.iter_mut() {
                let i = rest % x1.len();
                rest /= x1.len();
                *pd = x1[i];
                w *= w1[i];
            }
            points.push(p);
            weights.push(w);
        }
        Self { points, weights }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[[f64; DIM]] {
        &self.points
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

// nodes and weights on [0, 1], ascending
fn gauss_legendre_1d(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    for i in 0..n.div_ceil(2) {
        let mut t = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp = 1.0;
        for _ in 0..100 {
            // Legendre recurrence for P_n(t) and its derivative
            let (mut p0, mut p1) = (1.0, t);
            for k in 2..=n {
                let kf = k as f64;
                let p2 = ((2.0 * kf - 1.0) * t * p1 - (kf - 1.0) * p0) / kf;
                p0 = p1;
                p1 = p2;
            }
            let pn = if n == 1 { t } else { p1 };
            let pm = if n == 1 { 1.0 } else { p0 };
            dp = n as f64 * (t * pn - pm) / (t * t - 1.0);
            let step = pn / dp;
            t -= step;
            if step.abs() < 1e-15 {
                break;
            }
        }
        let w = 2.0 / ((1.0 - t * t) * dp * dp);
        // map [-1, 1] -> [0, 1]; t is the largest remaining root
        nodes[i] = 0.5 * (1.0 - t);
        nodes[n - 1 - i] = 0.5 * (1.0 + t);
        weights[i] = 0.5 * w;
        weights[n - 1 - i] = 0.5 * w;
    }
    (nodes, weights)
}

/// Rule `i` has `i + 1` points per axis.
#[derive(Clone, Debug, PartialEq)]
pub struct QuadratureFamily<const DIM: usize> {
    rules: Vec<Quadrature<DIM>>,
}

impl<const DIM: usize> QuadratureFamily<DIM> {
    pub fn gauss(n_rules: usize) -> Self {
        Self {
            rules: (0..n_rules).map(|i| Quadrature::gauss(i + 1)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, index: u8) -> Option<&Quadrature<DIM>> {
        self.rules.get(index as usize)
    }

    /// Every index must select a rule of this family.
    pub fn validate(&self, indices: &[u8]) -> Result<(), MeshOverlapError> {
        match indices.iter().find(|&&i| i as usize >= self.rules.len()) {
            Some(&index) => Err(MeshOverlapError::InvalidQuadratureIndex {
                index,
                n_rules: self.rules.len(),
            }),
            None => Ok(()),
        }
    }
}
