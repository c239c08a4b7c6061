use rand::Rng;

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerDimension {
    pub low: i64,
    pub high: i64,
}

impl IntegerDimension {
    pub fn new(low: i64, high: i64) -> Self {
        debug_assert!(low <= high, "dimension low must not exceed high");
        Self { low, high }
    }

    pub fn size(&self) -> u64 {
        (self.high - self.low) as u64 + 1
    }

    /// Map a value to `[0, 1]`. Single-valued dimensions map to 0.
    pub fn normalize(&self, value: i64) -> f64 {
        if self.high == self.low {
            0.0
        } else {
            (value - self.low) as f64 / (self.high - self.low) as f64
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        rng.gen_range(self.low..=self.high)
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.low..=self.high).contains(&value)
    }
}

/// Cartesian product of integer dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpace {
    dimensions: Vec<IntegerDimension>,
}

impl SearchSpace {
    pub fn new(dimensions: Vec<IntegerDimension>) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> &[IntegerDimension] {
        &self.dimensions
    }

    /// Number of grid points, saturating at `u64::MAX`.
    pub fn cardinality(&self) -> u64 {
        self.dimensions
            .iter()
            .fold(1u64, |acc, dim| acc.saturating_mul(dim.size()))
    }

    pub fn contains(&self, point: &[i64]) -> bool {
        point.len() == self.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(point)
                .all(|(dim, value)| dim.contains(*value))
    }

    pub fn normalize(&self, point: &[i64]) -> Vec<f64> {
        self.dimensions
            .iter()
            .zip(point)
            .map(|(dim, value)| dim.normalize(*value))
            .collect()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<i64> {
        self.dimensions.iter().map(|dim| dim.sample(rng)).collect()
    }

    /// Every grid point in row-major order (last dimension fastest).
    pub fn enumerate(&self) -> Vec<Vec<i64>> {
        let mut points: Vec<Vec<i64>> = vec![Vec::with_capacity(self.dimensions.len())];
        for dim in &self.dimensions {
            points = points
                .into_iter()
                .flat_map(|prefix| {
                    (dim.low..=dim.high).map(move |value| {
                        let mut point = prefix.clone();
                        point.push(value);
                        point
                    })
                })
                .collect();
        }
        points
    }
}
