//! Conditional vectors and category-stratified row sampling.
//!
//! The sampler indexes the encoded training rows by category for every
//! discrete column. Training-time conditional vectors pick a discrete column
//! uniformly and a category by (log-)frequency; real rows are then drawn from
//! the matching category so critic inputs line up with their conditions.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;
use tabgan_core::{is_discrete, ColumnInfo, TabError};

use crate::transformer::ConditionInfo;

/// A batch of training-time conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct CondVec {
    /// One-hot category block, `batch × dim_cond_vec`, row-major.
    pub cond: Vec<f32>,
    /// One-hot conditioned column, `batch × n_discrete_columns`, row-major.
    pub mask: Vec<f32>,
    /// Conditioned discrete column per row.
    pub columns: Vec<usize>,
    /// Chosen category per row.
    pub options: Vec<usize>,
}

#[derive(Debug, Clone)]
struct DiscreteColumn {
    /// Offset of the span in the encoded row.
    span_st: usize,
    /// Offset of the block in the conditional vector.
    cond_st: usize,
    /// Rows holding each category.
    rows_by_category: Vec<Vec<usize>>,
    /// Category draw weighted by (log-)frequency.
    category: WeightedIndex<f64>,
}

/// Samples conditional vectors and matching rows from encoded data.
///
/// # Example
///
/// ```
/// use rand::{rngs::StdRng, SeedableRng};
/// use tabgan_core::{ActivationFn, SpanInfo};
/// use tabgan_train::sampler::DataSampler;
///
/// let info = vec![vec![SpanInfo::new(2, ActivationFn::Softmax)]];
/// let data = vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0];
/// let sampler = DataSampler::new(data, 2, &info, true).unwrap();
/// assert_eq!(sampler.dim_cond_vec(), 2);
/// let cv = sampler.sample_condvec(4, &mut StdRng::seed_from_u64(0)).unwrap();
/// assert_eq!(cv.cond.len(), 4 * 2);
/// ```
#[derive(Debug, Clone)]
pub struct DataSampler {
    data: Vec<f32>,
    width: usize,
    n_rows: usize,
    discrete: Vec<DiscreteColumn>,
    /// Draw over every category of every discrete column at once.
    any_category: Option<WeightedIndex<f64>>,
    n_categories: usize,
}

impl DataSampler {
    /// Indexes `data` (row-major, `width` columns) by discrete category.
    ///
    /// With `log_frequency` set, categories are drawn in proportion to
    /// `ln(count + 1)` instead of `count`.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if a discrete column has no usable
    /// category weights.
    pub fn new(
        data: Vec<f32>,
        width: usize,
        output_info: &[ColumnInfo],
        log_frequency: bool,
    ) -> Result<Self, TabError> {
        let map_err = |e: rand::distributions::WeightedError| TabError::Internal {
            message: format!("DataSampler category weights: {e}"),
        };

        let n_rows = if width == 0 { 0 } else { data.len() / width };
        let mut discrete = Vec::new();
        let mut all_prob: Vec<f64> = Vec::new();
        let mut span_st = 0;
        let mut cond_st = 0;

        for column in output_info {
            let dim: usize = column.iter().map(|s| s.dim).sum();
            if is_discrete(column) {
                let mut rows_by_category = vec![Vec::new(); dim];
                for i in 0..n_rows {
                    let span = &data[i * width + span_st..i * width + span_st + dim];
                    if let Some(k) = span.iter().position(|&v| v > 0.5) {
                        rows_by_category[k].push(i);
                    }
                }
                let freq: Vec<f64> = rows_by_category
                    .iter()
                    .map(|r| {
                        let count = r.len() as f64;
                        if log_frequency { (count + 1.0).ln() } else { count }
                    })
                    .collect();
                let total: f64 = freq.iter().sum();
                let prob: Vec<f64> = if total > 0.0 {
                    freq.iter().map(|f| f / total).collect()
                } else {
                    vec![1.0 / dim as f64; dim]
                };
                all_prob.extend_from_slice(&prob);
                discrete.push(DiscreteColumn {
                    span_st,
                    cond_st,
                    rows_by_category,
                    category: WeightedIndex::new(&prob).map_err(map_err)?,
                });
                cond_st += dim;
            }
            span_st += dim;
        }

        let any_category = if all_prob.is_empty() {
            None
        } else {
            Some(WeightedIndex::new(&all_prob).map_err(map_err)?)
        };

        Ok(Self {
            data,
            width,
            n_rows,
            discrete,
            any_category,
            n_categories: cond_st,
        })
    }

    /// Width of the conditional vector.
    pub fn dim_cond_vec(&self) -> usize {
        self.n_categories
    }

    /// Number of discrete columns.
    pub fn n_discrete_columns(&self) -> usize {
        self.discrete.len()
    }

    /// Width of one encoded row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Draws training conditions; `None` when there are no discrete columns.
    pub fn sample_condvec(&self, batch: usize, rng: &mut StdRng) -> Option<CondVec> {
        if self.discrete.is_empty() {
            return None;
        }
        let n_disc = self.discrete.len();
        let mut cv = CondVec {
            cond: vec![0.0; batch * self.n_categories],
            mask: vec![0.0; batch * n_disc],
            columns: Vec::with_capacity(batch),
            options: Vec::with_capacity(batch),
        };
        for i in 0..batch {
            let c = rng.gen_range(0..n_disc);
            let column = &self.discrete[c];
            let k = column.category.sample(rng);
            cv.cond[i * self.n_categories + column.cond_st + k] = 1.0;
            cv.mask[i * n_disc + c] = 1.0;
            cv.columns.push(c);
            cv.options.push(k);
        }
        Some(cv)
    }

    /// Draws conditions over all categories of all discrete columns at once,
    /// weighted by the same per-column probabilities; used at sampling time.
    pub fn sample_original_condvec(&self, batch: usize, rng: &mut StdRng) -> Option<Vec<f32>> {
        let any_category = self.any_category.as_ref()?;
        let mut cond = vec![0.0; batch * self.n_categories];
        for i in 0..batch {
            let k = any_category.sample(rng);
            cond[i * self.n_categories + k] = 1.0;
        }
        Some(cond)
    }

    /// Draws `n` encoded rows, row-major.
    ///
    /// Without a condition, rows are drawn uniformly with replacement. With
    /// `(columns, options)`, row `i` is drawn from the rows whose discrete
    /// column `columns[i]` took category `options[i]`.
    pub fn sample_data(
        &self,
        n: usize,
        condition: Option<(&[usize], &[usize])>,
        rng: &mut StdRng,
    ) -> Vec<f32> {
        let mut out = Vec::with_capacity(n * self.width);
        for i in 0..n {
            let row = match condition {
                Some((columns, options)) => {
                    let rows = &self.discrete[columns[i]].rows_by_category[options[i]];
                    if rows.is_empty() {
                        rng.gen_range(0..self.n_rows)
                    } else {
                        rows[rng.gen_range(0..rows.len())]
                    }
                }
                None => rng.gen_range(0..self.n_rows),
            };
            out.extend_from_slice(&self.data[row * self.width..(row + 1) * self.width]);
        }
        out
    }

    /// Conditional vector fixing one category for every row of a batch.
    pub fn generate_cond_from_condition_column_info(&self, info: &ConditionInfo, batch: usize) -> Vec<f32> {
        let mut cond = vec![0.0; batch * self.n_categories];
        if let Some(column) = self.discrete.get(info.discrete_column_id) {
            let k = column.cond_st + info.value_id;
            for i in 0..batch {
                cond[i * self.n_categories + k] = 1.0;
            }
        }
        cond
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tabgan_core::{ActivationFn, SpanInfo};

    fn span_offsets(s: &DataSampler) -> Vec<usize> {
        s.discrete.iter().map(|c| c.span_st).collect()
    }

    /// One continuous column, then a 2-way and a 3-way discrete column.
    fn sampler(log_frequency: bool) -> DataSampler {
        let info = vec![
            vec![SpanInfo::new(1, ActivationFn::Tanh)],
            vec![SpanInfo::new(2, ActivationFn::Softmax)],
            vec![SpanInfo::new(3, ActivationFn::Softmax)],
        ];
        #[rustfmt::skip]
        let data = vec![
            0.1, 1.0, 0.0, 0.0, 0.0, 1.0,
            0.2, 1.0, 0.0, 1.0, 0.0, 0.0,
            0.3, 1.0, 0.0, 1.0, 0.0, 0.0,
            0.4, 0.0, 1.0, 0.0, 1.0, 0.0,
        ];
        DataSampler::new(data, 6, &info, log_frequency).unwrap()
    }

    #[test]
    fn dimensions() {
        let s = sampler(true);
        assert_eq!(s.dim_cond_vec(), 5);
        assert_eq!(s.n_discrete_columns(), 2);
        assert_eq!(span_offsets(&s), vec![1, 3]);
    }

    #[test]
    fn condvec_is_one_hot_with_matching_mask() {
        let s = sampler(true);
        let mut rng = StdRng::seed_from_u64(3);
        let cv = s.sample_condvec(50, &mut rng).unwrap();
        for i in 0..50 {
            let cond = &cv.cond[i * 5..(i + 1) * 5];
            let mask = &cv.mask[i * 2..(i + 1) * 2];
            assert_eq!(cond.iter().sum::<f32>(), 1.0);
            assert_eq!(mask.iter().sum::<f32>(), 1.0);
            assert_eq!(mask[cv.columns[i]], 1.0);
            let st = if cv.columns[i] == 0 { 0 } else { 2 };
            assert_eq!(cond[st + cv.options[i]], 1.0);
        }
    }

    #[test]
    fn conditioned_rows_match_category() {
        let s = sampler(false);
        let mut rng = StdRng::seed_from_u64(5);
        let cv = s.sample_condvec(40, &mut rng).unwrap();
        let rows = s.sample_data(40, Some((cv.columns.as_slice(), cv.options.as_slice())), &mut rng);
        let offsets = span_offsets(&s);
        for i in 0..40 {
            let row = &rows[i * 6..(i + 1) * 6];
            assert_eq!(row[offsets[cv.columns[i]] + cv.options[i]], 1.0);
        }
    }

    #[test]
    fn raw_frequency_follows_counts() {
        let s = sampler(false);
        let cv = s.sample_condvec(4000, &mut StdRng::seed_from_u64(0)).unwrap();
        // 3-way column counts are 2:1:1
        let picks: Vec<usize> = cv
            .columns
            .iter()
            .zip(&cv.options)
            .filter(|&(&c, _)| c == 1)
            .map(|(_, &o)| o)
            .collect();
        let share = picks.iter().filter(|&&o| o == 0).count() as f64 / picks.len() as f64;
        assert!((share - 0.5).abs() < 0.05, "{share}");
    }

    #[test]
    fn fixed_condition_vector() {
        let s = sampler(true);
        let info = ConditionInfo { discrete_column_id: 1, column_id: 2, value_id: 2 };
        let cond = s.generate_cond_from_condition_column_info(&info, 3);
        for i in 0..3 {
            assert_eq!(&cond[i * 5..(i + 1) * 5], &[0.0, 0.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn original_condvec_rows_are_one_hot() {
        let s = sampler(true);
        let cond = s.sample_original_condvec(10, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(cond.chunks(5).all(|r| r.iter().sum::<f32>() == 1.0));
    }

    #[test]
    fn original_condvec_weights_each_column_equally() {
        let s = sampler(false);
        let cond = s.sample_original_condvec(4000, &mut StdRng::seed_from_u64(2)).unwrap();
        // per-column probabilities [3/4, 1/4] and [1/2, 1/4, 1/4], halved
        let first = cond.chunks(5).filter(|r| r[0] == 1.0).count() as f64 / 4000.0;
        let third = cond.chunks(5).filter(|r| r[2] == 1.0).count() as f64 / 4000.0;
        assert!((first - 0.375).abs() < 0.03, "{first}");
        assert!((third - 0.25).abs() < 0.03, "{third}");
    }

    #[test]
    fn no_discrete_columns_means_no_condvec() {
        let info = vec![vec![SpanInfo::new(1, ActivationFn::Tanh)]];
        let s = DataSampler::new(vec![0.0, 1.0], 1, &info, true).unwrap();
        assert!(s.sample_condvec(4, &mut StdRng::seed_from_u64(0)).is_none());
        assert_eq!(s.sample_data(3, None, &mut StdRng::seed_from_u64(0)).len(), 3);
    }
}
