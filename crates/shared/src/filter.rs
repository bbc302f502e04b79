use std::collections::BTreeSet;

use crate::models::Point;

/// OR semantics: a point matches when any of its categories is selected.
/// An empty selection matches everything.
pub fn matches_categories(point: &Point, selected: &BTreeSet<String>) -> bool {
    selected.is_empty() || point.categories.iter().any(|c| selected.contains(c))
}

/// Keep the points matching `selected`, preserving input order.
pub fn filter_by_categories(points: &[Point], selected: &BTreeSet<String>) -> Vec<Point> {
    if selected.is_empty() {
        return points.to_vec();
    }
    points
        .iter()
        .filter(|p| matches_categories(p, selected))
        .cloned()
        .collect()
}

/// Sorted, de-duplicated catalogue of every category label in `points`.
pub fn extract_categories<'a>(points: impl IntoIterator<Item = &'a Point>) -> Vec<String> {
    points
        .into_iter()
        .flat_map(|p| p.categories.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::gangnam;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn names(points: &[Point]) -> Vec<&str> {
        points.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_empty_selection_is_identity() {
        let points = gangnam();
        assert_eq!(filter_by_categories(&points, &BTreeSet::new()), points);
    }

    #[test]
    fn test_single_category() {
        let points = gangnam();
        let filtered = filter_by_categories(&points, &set(&["한식"]));
        assert_eq!(names(&filtered), vec!["역삼맛집", "삼성맛집", "부산맛집"]);
    }

    #[test]
    fn test_or_semantics() {
        let points = gangnam();
        let filtered = filter_by_categories(&points, &set(&["일식", "중식"]));
        assert_eq!(names(&filtered), vec!["선릉맛집", "인천맛집"]);
    }

    #[test]
    fn test_adding_categories_never_shrinks_result() {
        let points = gangnam();
        let one = filter_by_categories(&points, &set(&["한식"]));
        let two = filter_by_categories(&points, &set(&["한식", "일식"]));
        assert!(two.len() >= one.len());
        assert_eq!(two.len(), 4);
    }

    #[test]
    fn test_unknown_category_matches_nothing() {
        let points = gangnam();
        assert!(filter_by_categories(&points, &set(&["양식"])).is_empty());
    }

    #[test]
    fn test_extract_categories_sorted_unique() {
        let points = gangnam();
        let cats = extract_categories(&points);
        let mut expected = vec!["단체", "일식", "중식", "한식"];
        expected.sort();
        assert_eq!(cats, expected);
    }
}
