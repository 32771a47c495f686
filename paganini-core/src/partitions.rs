//! Integer partitions in multiplicity form, plus the small number-theoretic
//! helpers used by Pólya cycle indices.

use num_integer::Integer;

/// Enumerates the partitions of `n` as multiplicity vectors `(k_1, .., k_n)`
/// with `sum(i * k_i) == n`.
///
/// Partitions are produced in reverse lexicographic order of their parts,
/// starting from `[n]`. Clone the iterator (or build a new one) to restart.
#[derive(Clone, Debug)]
pub struct Partitions {
    n: u32,
    parts: Vec<u32>,
    started: bool,
    done: bool,
}

impl Partitions {
    pub fn new(n: u32) -> Self {
        Self {
            n,
            parts: if n == 0 { Vec::new() } else { vec![n] },
            started: false,
            done: false,
        }
    }

    // Rewrites `parts` into its successor; false once `[1, .., 1]` is passed.
    fn advance(&mut self) -> bool {
        let mut ones = 0;
        while let Some(&1) = self.parts.last() {
            self.parts.pop();
            ones += 1;
        }
        let Some(last) = self.parts.pop() else {
            return false;
        };
        let part = last - 1;
        let mut rest = ones + 1;
        self.parts.push(part);
        while rest >= part {
            self.parts.push(part);
            rest -= part;
        }
        if rest > 0 {
            self.parts.push(rest);
        }
        true
    }

    fn multiplicities(&self) -> Vec<u32> {
        let mut ks = vec![0; self.n as usize];
        for &p in &self.parts {
            ks[(p - 1) as usize] += 1;
        }
        ks
    }
}

impl Iterator for Partitions {
    type Item = Vec<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
        } else if !self.advance() {
            self.done = true;
            return None;
        }
        Some(self.multiplicities())
    }
}

pub fn partition_sequences(n: u32) -> Vec<Vec<u32>> {
    Partitions::new(n).collect()
}

/// Number of partitions of `n` (Euler's pentagonal recurrence), or `None`
/// once the recurrence leaves the 128-bit range (from n = 1418 on).
pub fn count(n: u32) -> Option<u128> {
    let n = n as usize;
    let mut p = vec![0i128; n + 1];
    p[0] = 1;
    for m in 1..=n {
        let mut acc = 0i128;
        for k in 1.. {
            let g1 = k * (3 * k - 1) / 2;
            if g1 > m {
                break;
            }
            let g2 = k * (3 * k + 1) / 2;
            let mut term = p[m - g1];
            if g2 <= m {
                term = term.checked_add(p[m - g2])?;
            }
            acc = if k.is_odd() {
                acc.checked_add(term)?
            } else {
                acc.checked_sub(term)?
            };
        }
        p[m] = acc;
    }
    u128::try_from(p[n]).ok()
}

/// Euler's totient.
pub fn totient(n: u32) -> u32 {
    (1..=n).filter(|k| k.gcd(&n) == 1).count() as u32
}

pub(crate) fn factorial(k: u32) -> f64 {
    (1..=k).map(f64::from).product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn partitions_of_four() {
        let got = partition_sequences(4);
        assert_eq!(
            got,
            vec![
                vec![0, 0, 0, 1],
                vec![1, 0, 1, 0],
                vec![0, 2, 0, 0],
                vec![2, 1, 0, 0],
                vec![4, 0, 0, 0],
            ]
        );
    }

    #[test]
    fn vectors_have_length_n_and_weight_n() {
        for n in 1..=14u32 {
            for ks in Partitions::new(n) {
                assert_eq!(ks.len(), n as usize);
                let weight: u32 = ks.iter().enumerate().map(|(i, k)| (i as u32 + 1) * k).sum();
                assert_eq!(weight, n);
            }
        }
    }

    #[test]
    fn enumeration_is_exhaustive_and_non_repeating() {
        for n in 0..=16u32 {
            let all = partition_sequences(n);
            let distinct: HashSet<Vec<u32>> = all.iter().cloned().collect();
            assert_eq!(distinct.len(), all.len());
            assert_eq!(Some(all.len() as u128), count(n), "n = {}", n);
        }
    }

    #[test]
    fn zero_has_the_empty_partition() {
        assert_eq!(partition_sequences(0), vec![Vec::<u32>::new()]);
    }

    #[test]
    fn restart_by_clone() {
        let mut it = Partitions::new(6);
        let fresh = it.clone();
        it.next();
        it.next();
        assert_eq!(fresh.count(), 11);
        assert_eq!(it.count(), 9);
    }

    #[test]
    fn known_partition_numbers() {
        assert_eq!(count(1), Some(1));
        assert_eq!(count(10), Some(42));
        assert_eq!(count(20), Some(627));
        assert_eq!(count(50), Some(204226));
        assert_eq!(count(100), Some(190569292));
        assert_eq!(count(200), Some(3972999029388));
        assert_eq!(count(1000), Some(24061467864032622473692149727991));
    }

    #[test]
    fn large_partition_numbers_do_not_wrap() {
        assert!(count(1417).is_some());
        assert_eq!(count(1418), None);
        assert_eq!(count(5000), None);
    }

    #[test]
    fn totients() {
        let phi: Vec<u32> = (1..=12).map(totient).collect();
        assert_eq!(phi, vec![1, 1, 2, 2, 4, 2, 6, 4, 6, 4, 10, 4]);
    }

    #[test]
    fn factorials() {
        assert_eq!(factorial(0), 1.0);
        assert_eq!(factorial(5), 120.0);
    }
}
