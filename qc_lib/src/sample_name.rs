//! Sample identity: parsing raw MultiQC sample labels, and merging the data
//! of samples that ended up under two labels.

use anyhow::{bail, Result};
use lazy_static::lazy_static;
use qc_types::table::registry;
use regex::Regex;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

lazy_static! {
    static ref LANE_READ_REGEX: Regex = Regex::new(r"_(S[0-9]+)_(L[0-9]+)_(R[12])").unwrap();
    static ref ORDER_REGEX: Regex = Regex::new(r"_S[0-9]+").unwrap();
    static ref VARIANT_SUFFIX_REGEX: Regex =
        Regex::new(r"_INDEL_PASS|_INDEL_ALL|_SNP_PASS|_SNP_ALL").unwrap();
    static ref ALPHANUMERIC_REGEX: Regex = Regex::new(r"[a-zA-Z0-9]+").unwrap();
}

/// Added to sample names by SNP genotyping.
const SORTED_SUFFIX: &str = "_sorted";

/// A raw label resolved to a sample, plus the lane and read for tools that
/// report per lane and read. `lane` and `read` are empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleLabel {
    pub sample_id: String,
    pub lane: String,
    pub read: String,
}

impl SampleLabel {
    pub fn has_lane_read(&self) -> bool {
        !self.lane.is_empty() && !self.read.is_empty()
    }
}

/// Parse the sample label `raw_label` reported by `tool`.
pub fn parse_sample_label(tool: &str, raw_label: &str) -> Result<SampleLabel> {
    let lane_read_divided = registry()?.is_lane_read_divided(tool);
    Ok(parse_label(raw_label, lane_read_divided))
}

/// Naming convention rules behind [`parse_sample_label`].
pub fn parse_label(raw_label: &str, lane_read_divided: bool) -> SampleLabel {
    let label = raw_label.replace(SORTED_SUFFIX, "");

    if lane_read_divided {
        return match LANE_READ_REGEX.captures(&label) {
            Some(caps) => SampleLabel {
                sample_id: join_alphanumeric(&label[..caps.get(0).map_or(0, |m| m.start())]),
                lane: caps[2].to_string(),
                read: caps[3].to_string(),
            },
            None => SampleLabel {
                sample_id: label,
                lane: String::new(),
                read: String::new(),
            },
        };
    }

    let sample_id = match ORDER_REGEX.find(&label) {
        Some(m) => join_alphanumeric(&label[..m.start()]),
        None => join_alphanumeric(&VARIANT_SUFFIX_REGEX.replace_all(&label, "")),
    };
    SampleLabel {
        sample_id,
        lane: String::new(),
        read: String::new(),
    }
}

/// `NA12878_1.TWE` -> `NA12878-1-TWE`
fn join_alphanumeric(s: &str) -> String {
    ALPHANUMERIC_REGEX
        .find_iter(s)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join("-")
}

/// Per-sample data that can take in the data of another entry for the same
/// sample.
pub trait Absorb {
    fn absorb(&mut self, other: Self);
}

impl<K: Ord, V> Absorb for BTreeMap<K, V> {
    fn absorb(&mut self, other: Self) {
        self.extend(other);
    }
}

/// Merge the entries of samples whose id is a prefix pattern of other ids.
///
/// Old runs report `NA12878` for some tools and
/// `NA12878-NA12878-1-TWE-F-EGG4` for others, splitting one sample in two.
/// Every group of ids that start with one of them is merged under their most
/// frequent pairwise longest common substring. When one merge target is
/// contained in a longer one, the shorter target takes both groups. Merging
/// is repeated until no group is left, so the result is a fixpoint.
pub fn merge_overlapping_sample_ids<T: Absorb>(
    mut data: BTreeMap<String, T>,
) -> Result<BTreeMap<String, T>> {
    loop {
        let groups = overlap_groups(data.keys().map(String::as_str))?;
        if groups.is_empty() {
            return Ok(data);
        }

        for (canonical, members) in groups {
            let mut merged: Option<T> = None;
            for member in &members {
                let Some(entry) = data.remove(member) else {
                    continue;
                };
                merged = Some(match merged.take() {
                    Some(mut acc) => {
                        acc.absorb(entry);
                        acc
                    }
                    None => entry,
                });
            }
            let Some(merged) = merged else {
                continue;
            };
            match data.entry(canonical) {
                Entry::Occupied(mut e) => e.get_mut().absorb(merged),
                Entry::Vacant(e) => {
                    e.insert(merged);
                }
            }
        }
    }
}

/// Merge targets and the ids they take in, for one round of merging.
fn overlap_groups<'a>(
    ids: impl Iterator<Item = &'a str> + Clone,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut candidates: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for id in ids.clone() {
        // an empty id would match every other one
        if id.is_empty() {
            continue;
        }
        let pattern = Regex::new(&format!("^{}", regex::escape(id)))?;
        let matches: Vec<&str> = ids.clone().filter(|other| pattern.is_match(other)).collect();

        match matches.len() {
            0 => bail!("sample id '{id}' does not match itself"),
            1 => continue,
            _ => {}
        }

        let common = most_frequent_common_substring(&matches);
        let trimmed = common.trim_end_matches(['-', '_']);
        let canonical = if trimmed.is_empty() { id } else { trimmed };
        candidates
            .entry(canonical.to_string())
            .or_default()
            .extend(matches.iter().map(|m| m.to_string()));
    }

    let targets: Vec<&String> = candidates.keys().collect();
    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (canonical, members) in &candidates {
        let absorber = targets
            .iter()
            .filter(|t| t.len() < canonical.len() && canonical.contains(t.as_str()))
            .min_by(|x, y| x.len().cmp(&y.len()).then_with(|| x.cmp(y)))
            .map_or(canonical, |t| *t);
        groups
            .entry(absorber.clone())
            .or_default()
            .extend(members.iter().cloned());
    }
    Ok(groups)
}

/// The pairwise longest common substring found for the most pairs, first
/// seen on ties.
fn most_frequent_common_substring(strings: &[&str]) -> String {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for (i, a) in strings.iter().enumerate() {
        for b in &strings[i + 1..] {
            let common = longest_common_substring(a, b);
            match counts.iter_mut().find(|(s, _)| *s == common) {
                Some((_, n)) => *n += 1,
                None => counts.push((common, 1)),
            }
        }
    }

    let mut best: Option<(String, usize)> = None;
    for (s, n) in counts {
        if best.as_ref().map_or(true, |(_, b)| n > *b) {
            best = Some((s, n));
        }
    }
    best.map(|(s, _)| s).unwrap_or_default()
}

/// Longest substring shared by `a` and `b`. Ties go to the match starting
/// earliest in `a`, then earliest in `b`.
pub fn longest_common_substring(a: &str, b: &str) -> String {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    // lengths of the common suffixes of a[..i] and b[..j], one row at a time
    let mut prev = vec![0usize; b.len() + 1];
    let mut best_len = 0;
    let mut best_end = 0;
    for i in 1..=a.len() {
        let mut row = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                row[j] = prev[j - 1] + 1;
                if row[j] > best_len {
                    best_len = row[j];
                    best_end = i;
                }
            }
        }
        prev = row;
    }
    a[best_end - best_len..best_end].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn label(sample_id: &str, lane: &str, read: &str) -> SampleLabel {
        SampleLabel {
            sample_id: sample_id.to_string(),
            lane: lane.to_string(),
            read: read.to_string(),
        }
    }

    #[test]
    fn test_parse_lane_read_label() {
        assert_eq!(
            parse_sample_label("fastqc", "SAMPLE1_S1_L001_R1").unwrap(),
            label("SAMPLE1", "L001", "R1")
        );
        assert_eq!(
            parse_sample_label("fastqc", "NA12878-NA12878-1-TWE-F-EGG4_S31_L002_R2").unwrap(),
            label("NA12878-NA12878-1-TWE-F-EGG4", "L002", "R2")
        );
        assert_eq!(
            parse_sample_label("fastqc", "X.Y_sorted_S2_L001_R1").unwrap(),
            label("X-Y", "L001", "R1")
        );
        // no lane and read: the whole cleaned label is kept
        assert_eq!(
            parse_sample_label("fastqc", "Undetermined_R1").unwrap(),
            label("Undetermined_R1", "", "")
        );
    }

    #[test]
    fn test_parse_sample_label() {
        assert_eq!(
            parse_sample_label("happy", "SAMPLE2_INDEL_PASS").unwrap(),
            label("SAMPLE2", "", "")
        );
        assert_eq!(
            parse_sample_label("samtools_flagstat", "S1_S1").unwrap(),
            label("S1", "", "")
        );
        assert_eq!(
            parse_sample_label("picard", "123456-R0001_sorted_S12").unwrap(),
            label("123456-R0001", "", "")
        );
        assert_eq!(
            parse_sample_label("somalier", "NA12878_1.TWE_SNP_ALL").unwrap(),
            label("NA12878-1-TWE", "", "")
        );
        assert!(!parse_label("SAMPLE2", false).has_lane_read());
    }

    #[test]
    fn test_longest_common_substring() {
        assert_eq!(
            longest_common_substring("NA12878", "NA12878-NA12878-1"),
            "NA12878"
        );
        assert_eq!(longest_common_substring("abcXdef", "defYabc"), "abc");
        assert_eq!(longest_common_substring("abc", "xyz"), "");
        assert_eq!(longest_common_substring("", "xyz"), "");
    }

    fn tools(pairs: &[(&str, i32)]) -> BTreeMap<String, i32> {
        pairs.iter().map(|(t, v)| (t.to_string(), *v)).collect()
    }

    #[test]
    fn test_merge_overlapping_ids() {
        let data = BTreeMap::from([
            (
                "NA12878".to_string(),
                tools(&[("happy", 1), ("somalier", 2)]),
            ),
            (
                "NA12878-NA12878-1-TWE-F-EGG4".to_string(),
                tools(&[("fastqc", 3), ("picard", 4)]),
            ),
            ("OTHER".to_string(), tools(&[("fastqc", 5)])),
        ]);
        let merged = merge_overlapping_sample_ids(data).unwrap();
        assert_eq!(
            merged,
            BTreeMap::from([
                (
                    "NA12878".to_string(),
                    tools(&[("fastqc", 3), ("happy", 1), ("picard", 4), ("somalier", 2)]),
                ),
                ("OTHER".to_string(), tools(&[("fastqc", 5)])),
            ])
        );
    }

    #[test]
    fn test_merge_three_way_overlap() {
        let data = BTreeMap::from([
            ("S1".to_string(), tools(&[("a", 1)])),
            ("S1-S1".to_string(), tools(&[("b", 2)])),
            ("S1_S1".to_string(), tools(&[("c", 3)])),
        ]);
        let merged = merge_overlapping_sample_ids(data).unwrap();
        assert_eq!(
            merged,
            BTreeMap::from([("S1".to_string(), tools(&[("a", 1), ("b", 2), ("c", 3)]))])
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let data = BTreeMap::from([
            ("A1".to_string(), tools(&[("a", 1)])),
            ("A1-B".to_string(), tools(&[("b", 2)])),
            ("A1-B-C".to_string(), tools(&[("c", 3)])),
            ("A12".to_string(), tools(&[("d", 4)])),
            ("Z9".to_string(), tools(&[("e", 5)])),
        ]);
        let once = merge_overlapping_sample_ids(data).unwrap();
        let twice = merge_overlapping_sample_ids(once.clone()).unwrap();
        assert_eq!(once, twice);
        for id in once.keys() {
            let others = once.keys().filter(|o| *o != id && o.starts_with(id.as_str()));
            assert_eq!(others.count(), 0, "{id} still overlaps");
        }
    }

    #[test]
    fn test_untouched_when_no_overlap() {
        let data = BTreeMap::from([
            ("A".to_string(), tools(&[("a", 1)])),
            ("B".to_string(), tools(&[("b", 2)])),
        ]);
        assert_eq!(merge_overlapping_sample_ids(data.clone()).unwrap(), data);
    }
}
