//! In-memory ORDER BY.
//!
//! A stable bubble sort on the first key, then each run of rows that tie on
//! it is refined by the next key. Passes stop as soon as nothing moves.

use std::cmp::Ordering;

use serde_json::Value as Json;

use crate::ast::{Nulls, Sort};
use crate::driver::Row;

/// One sort key over a synthetic column.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub column: String,
    pub sort: Sort,
    pub nulls: Option<Nulls>,
}

impl OrderKey {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            sort: Sort::Asc,
            nulls: None,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            sort: Sort::Desc,
            nulls: None,
        }
    }

    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let x = a.get(&self.column).unwrap_or(&Json::Null);
        let y = b.get(&self.column).unwrap_or(&Json::Null);
        // NULL sorts lowest unless placed explicitly.
        let null_first = match self.nulls {
            Some(Nulls::First) => true,
            Some(Nulls::Last) => false,
            None => self.sort == Sort::Asc,
        };
        match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if null_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if null_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = compare_values(x, y);
                match self.sort {
                    Sort::Asc => ord,
                    Sort::Desc => ord.reverse(),
                }
            }
        }
    }
}

fn rank(value: &Json) -> u8 {
    match value {
        Json::Null => 0,
        Json::Bool(_) => 1,
        Json::Number(_) => 2,
        Json::String(_) => 3,
        Json::Array(_) => 4,
        Json::Object(_) => 5,
    }
}

fn compare_values(x: &Json, y: &Json) -> Ordering {
    match (x, y) {
        (Json::Bool(a), Json::Bool(b)) => a.cmp(b),
        (Json::Number(a), Json::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Json::String(a), Json::String(b)) => a.cmp(b),
        _ if rank(x) != rank(y) => rank(x).cmp(&rank(y)),
        _ => x.to_string().cmp(&y.to_string()),
    }
}

pub(crate) fn sort(rows: &mut [Row], keys: &[OrderKey]) {
    let Some((key, rest)) = keys.split_first() else {
        return;
    };
    bubble(rows, key);
    if rest.is_empty() {
        return;
    }
    let mut start = 0;
    while start < rows.len() {
        let mut end = start + 1;
        while end < rows.len() && key.compare(&rows[start], &rows[end]) == Ordering::Equal {
            end += 1;
        }
        if end - start > 1 {
            sort(&mut rows[start..end], rest);
        }
        start = end;
    }
}

fn bubble(rows: &mut [Row], key: &OrderKey) {
    let mut unsorted = rows.len();
    while unsorted > 1 {
        let mut last_swap = 0;
        for i in 1..unsorted {
            if key.compare(&rows[i - 1], &rows[i]) == Ordering::Greater {
                rows.swap(i - 1, i);
                last_swap = i;
            }
        }
        if last_swap == 0 {
            break;
        }
        unsorted = last_swap;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rows(values: &[Json]) -> Vec<Row> {
        values
            .iter()
            .map(|v| v.as_object().cloned().unwrap_or_default())
            .collect()
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_sort_is_stable() {
        let mut data = rows(&[
            json!({"id": 1, "k": "b"}),
            json!({"id": 2, "k": "a"}),
            json!({"id": 3, "k": "b"}),
            json!({"id": 4, "k": "a"}),
            json!({"id": 5, "k": "b"}),
        ]);
        sort(&mut data, &[OrderKey::asc("k")]);
        assert_eq!(ids(&data), vec![2, 4, 1, 3, 5]);
    }

    #[test]
    fn test_sections_are_refined_by_later_keys() {
        let mut data = rows(&[
            json!({"id": 1, "a": 1, "b": 1}),
            json!({"id": 2, "a": 2, "b": 5}),
            json!({"id": 3, "a": 1, "b": 3}),
            json!({"id": 4, "a": 2, "b": 7}),
        ]);
        sort(&mut data, &[OrderKey::asc("a"), OrderKey::desc("b")]);
        assert_eq!(ids(&data), vec![3, 1, 4, 2]);
    }

    #[test]
    fn test_null_placement() {
        let data = rows(&[
            json!({"id": 1, "k": 2}),
            json!({"id": 2, "k": null}),
            json!({"id": 3, "k": 1}),
        ]);

        let mut asc = data.clone();
        sort(&mut asc, &[OrderKey::asc("k")]);
        assert_eq!(ids(&asc), vec![2, 3, 1]);

        let mut desc = data.clone();
        sort(&mut desc, &[OrderKey::desc("k")]);
        assert_eq!(ids(&desc), vec![1, 3, 2]);

        let mut last = data;
        let key = OrderKey {
            nulls: Some(Nulls::Last),
            ..OrderKey::asc("k")
        };
        sort(&mut last, &[key]);
        assert_eq!(ids(&last), vec![3, 1, 2]);
    }
}
