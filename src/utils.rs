//! Utility types and functions.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use time::macros::format_description;
use time::OffsetDateTime;

/// Ordered map with lazy value construction.
///
/// Iteration follows key order so that anything derived from a walk over the
/// map is reproducible from one run to the next.
#[derive(Debug, Clone)]
pub struct Dispatcher<K, V> {
    items: BTreeMap<K, V>,
}

impl<K, V> Dispatcher<K, V>
where
    K: Ord + Clone,
{
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    pub fn get_or_new<F: FnOnce() -> V>(&mut self, k: &K, f: F) -> &mut V {
        self.items.entry(k.clone()).or_insert_with(f)
    }

    pub fn get(&self, k: &K) -> Option<&V> {
        self.items.get(k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.items.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.items.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K, V> Default for Dispatcher<K, V>
where
    K: Ord + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Merges two ordered iterators into a single ordered iterator.
///
/// On ties, the item of the first iterator is yielded first.
pub struct InterleaveBy<F, I, J, T> {
    cmp: F,
    i: I,
    j: J,
    v_i: Option<T>,
    v_j: Option<T>,
}

impl<F, I, J, T> InterleaveBy<F, I, J, T>
where
    I: Iterator<Item = T>,
    J: Iterator<Item = T>,
    F: Fn(&T, &T) -> Ordering,
{
    pub fn new(i: I, j: J, cmp: F) -> Self {
        Self {
            cmp,
            i,
            j,
            v_i: None,
            v_j: None,
        }
    }
}

impl<F, I, J, T> Iterator for InterleaveBy<F, I, J, T>
where
    I: Iterator<Item = T>,
    J: Iterator<Item = T>,
    F: Fn(&T, &T) -> Ordering,
{
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.v_i = self.v_i.take().or_else(|| self.i.next());
        self.v_j = self.v_j.take().or_else(|| self.j.next());

        match (&self.v_i, &self.v_j) {
            (None, None) => None,
            (None, Some(_)) => self.v_j.take(),
            (Some(_), None) => self.v_i.take(),
            (Some(i), Some(j)) => {
                if (self.cmp)(i, j) == Ordering::Greater {
                    self.v_j.take()
                } else {
                    self.v_i.take()
                }
            }
        }
    }
}

/// Median of an unsorted sample. Even-sized samples average the two middle
/// values. Returns `None` on an empty sample.
pub fn median(data: &[i64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }

    let mut sorted_data = data.to_owned();
    sorted_data.sort_unstable();
    let len = sorted_data.len();

    if len % 2 == 0 {
        Some((sorted_data[len / 2 - 1] as f64 + sorted_data[len / 2] as f64) / 2.0)
    } else {
        Some(sorted_data[len / 2] as f64)
    }
}

/// Pretty prints a trace timestamp as wall-clock time followed by the
/// sub-second part split in groups of three digits.
pub fn pretty_time(ts: u64) -> String {
    let nano = format!("{:09}", ts % 1_000_000_000);
    let date_format = format_description!("[month]-[day]-[year] [hour]:[minute]:[second]");

    let date = OffsetDateTime::from_unix_timestamp((ts / 1_000_000_000) as i64)
        .ok()
        .and_then(|d| d.format(&date_format).ok());

    match date {
        Some(d) => format!("{}.{} {} {}", d, &nano[..3], &nano[3..6], &nano[6..]),
        None => format!("{}ns", ts),
    }
}

#[cfg(test)]
mod tests {
    use super::{median, pretty_time, Dispatcher, InterleaveBy};

    #[test]
    fn test_interleave() {
        let x1 = &[1, 3, 5];
        let x2 = &[2, 4, 6];

        let it = InterleaveBy::new(x1.iter(), x2.iter(), |a, b| a.cmp(b));

        let res: Vec<u32> = it.copied().collect();

        assert_eq!(res, &[1, 2, 3, 4, 5, 6]);

        let x1 = &[1, 1, 7];
        let x2 = &[1, 2];

        let it = InterleaveBy::new(
            x1.iter().map(|v| (*v, 'a')),
            x2.iter().map(|v| (*v, 'b')),
            |a, b| a.0.cmp(&b.0),
        );

        let res: Vec<(u32, char)> = it.collect();

        assert_eq!(res, &[(1, 'a'), (1, 'a'), (1, 'b'), (2, 'b'), (7, 'a')]);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[7]), Some(7.0));
        assert_eq!(median(&[9, 1, 5]), Some(5.0));
        assert_eq!(median(&[-1, 2]), Some(0.5));
        assert_eq!(median(&[4, 1, 3, 2]), Some(2.5));
    }

    #[test]
    fn test_dispatcher_order() {
        let mut d: Dispatcher<u32, Vec<u32>> = Dispatcher::new();

        d.get_or_new(&3, Vec::new).push(30);
        d.get_or_new(&1, Vec::new).push(10);
        d.get_or_new(&3, Vec::new).push(31);

        let keys: Vec<u32> = d.keys().copied().collect();

        assert_eq!(keys, &[1, 3]);
        assert_eq!(d.get(&3), Some(&vec![30, 31]));
        assert_eq!(d.values().count(), 2);
    }

    #[test]
    fn test_pretty_time() {
        assert_eq!(pretty_time(1_000_000_123), "01-01-1970 00:00:01.000 000 123");
    }
}
