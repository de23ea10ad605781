//! Input routing for the head pipelines
//!
//! The query source feeds every head's Query projection; the key/value
//! source feeds both the Key and the Value projection of every head. No
//! values are transformed. In the fully-parallel schedule the routing is a
//! set of borrowed views; in the streaming schedule the same rows are pushed
//! into per-head channels one position at a time.

use crate::config::MhaConfig;
use crate::error::{check_len, MhaResult};
use crate::numeric::Element;

/// Row-major `[seq_len, feature_dim]` views consumed by one head
#[derive(Debug, Clone, Copy)]
pub struct HeadInputs<'a, D> {
    pub head: usize,
    pub query: &'a [D],
    pub key: &'a [D],
    pub value: &'a [D],
    pub seq_len: usize,
    pub feature_dim: usize,
}

impl<'a, D: Element> HeadInputs<'a, D> {
    #[inline]
    pub fn query_row(&self, position: usize) -> &'a [D] {
        &self.query[position * self.feature_dim..(position + 1) * self.feature_dim]
    }

    #[inline]
    pub fn key_row(&self, position: usize) -> &'a [D] {
        &self.key[position * self.feature_dim..(position + 1) * self.feature_dim]
    }

    #[inline]
    pub fn value_row(&self, position: usize) -> &'a [D] {
        &self.value[position * self.feature_dim..(position + 1) * self.feature_dim]
    }
}

/// Splits and duplicates the two layer inputs into per-head streams
#[derive(Debug, Clone, Copy)]
pub struct DataPrep {
    num_heads: usize,
    seq_len: usize,
    feature_dim: usize,
}

impl DataPrep {
    pub fn new(config: &MhaConfig) -> Self {
        DataPrep {
            num_heads: config.num_heads,
            seq_len: config.seq_len,
            feature_dim: config.feature_dim,
        }
    }

    /// Both sources must hold exactly `seq_len * feature_dim` elements
    pub fn validate<D: Element>(&self, query_source: &[D], kv_source: &[D]) -> MhaResult<()> {
        let expected = self.seq_len * self.feature_dim;
        check_len("query_source", query_source.len(), expected)?;
        check_len("kv_source", kv_source.len(), expected)?;
        Ok(())
    }

    /// Per-head views, in head order
    pub fn route<'a, D: Element>(
        &self,
        query_source: &'a [D],
        kv_source: &'a [D],
    ) -> Vec<HeadInputs<'a, D>> {
        (0..self.num_heads)
            .map(|head| HeadInputs {
                head,
                query: query_source,
                key: kv_source,
                value: kv_source,
                seq_len: self.seq_len,
                feature_dim: self.feature_dim,
            })
            .collect()
    }

    /// Position rows of a source, in streaming order
    pub fn positions<'a, D: Element>(&self, source: &'a [D]) -> std::slice::ChunksExact<'a, D> {
        source.chunks_exact(self.feature_dim.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_duplicates_kv_source() {
        let config = MhaConfig::new(3, 2, 2, 2, 2);
        let prep = DataPrep::new(&config);
        let q = [1.0f32, 2.0, 3.0, 4.0];
        let kv = [5.0f32, 6.0, 7.0, 8.0];

        let heads = prep.route(&q, &kv);
        assert_eq!(heads.len(), 3);
        for (h, inputs) in heads.iter().enumerate() {
            assert_eq!(inputs.head, h);
            assert_eq!(inputs.query_row(1), &[3.0, 4.0]);
            assert_eq!(inputs.key_row(0), &[5.0, 6.0]);
            assert_eq!(inputs.value_row(1), &[7.0, 8.0]);
        }
    }

    #[test]
    fn test_validate_source_lengths() {
        let config = MhaConfig::new(1, 2, 2, 3, 2);
        let prep = DataPrep::new(&config);
        let ok = [0.0f32; 6];
        let short = [0.0f32; 5];
        assert!(prep.validate(&ok, &ok).is_ok());

        let err = prep.validate(&ok, &short).unwrap_err();
        assert!(err.to_string().contains("kv_source"));
        assert!(prep.validate(&short, &ok).is_err());
    }

    #[test]
    fn test_positions_in_order() {
        let config = MhaConfig::new(1, 1, 1, 2, 3);
        let prep = DataPrep::new(&config);
        let src = [0.0f64, 1.0, 2.0, 3.0, 4.0, 5.0];
        let rows: Vec<&[f64]> = prep.positions(&src).collect();
        assert_eq!(rows, vec![&[0.0, 1.0][..], &[2.0, 3.0][..], &[4.0, 5.0][..]]);
    }
}
