use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use mmfood_core::types::{DishSpec, SourceItem};

/// Deterministic, seeded selection of up to `quota` items for one dish.
///
/// Filters by case-normalized, trimmed dish name, applies a seeded
/// permutation to the filtered set, and takes the first `min(quota, n)`
/// items. The permuted position is the item's ordinal index, so two runs
/// with the same `(seed, quota, source snapshot)` assign identical indices;
/// resume depends on this.
pub fn sample_dish<'a>(items: &'a [SourceItem], dish: &DishSpec, seed: u64) -> Vec<&'a SourceItem> {
    let wanted = normalize(&dish.name);
    let mut selected: Vec<&SourceItem> = items
        .iter()
        .filter(|item| normalize(&item.dish_name) == wanted)
        .collect();

    // Fresh RNG per dish: a dish's permutation must not depend on how many
    // items earlier dishes consumed from the stream.
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    selected.shuffle(&mut rng);
    selected.truncate(dish.quota as usize);

    if selected.is_empty() {
        warn!(
            target: "mmfood_ingest",
            event = "dish_empty",
            dish = dish.name.as_str(),
            label = dish.label.as_str(),
            "no source items matched dish"
        );
    }
    selected
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(dish: &str, marker: u64) -> SourceItem {
        SourceItem {
            dish_name: dish.to_string(),
            image: None,
            portion_size: Some(serde_json::json!(marker)),
            nutritional_profile: None,
        }
    }

    fn markers(selected: &[&SourceItem]) -> Vec<u64> {
        selected
            .iter()
            .map(|s| s.portion_size.as_ref().and_then(|v| v.as_u64()).unwrap())
            .collect()
    }

    #[test]
    fn two_passes_select_the_same_ordered_subset() {
        let items: Vec<SourceItem> = (0..50).map(|i| item("sushi", i)).collect();
        let dish = DishSpec::new("sushi", 10).unwrap();

        let a = markers(&sample_dish(&items, &dish, 42));
        let b = markers(&sample_dish(&items, &dish, 42));
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
    }

    #[test]
    fn quota_truncates_and_short_classes_keep_everything() {
        let items: Vec<SourceItem> = (0..3).map(|i| item("ramen", i)).collect();

        let small = DishSpec::new("ramen", 10).unwrap();
        assert_eq!(sample_dish(&items, &small, 42).len(), 3);

        let capped = DishSpec::new("ramen", 2).unwrap();
        assert_eq!(sample_dish(&items, &capped, 42).len(), 2);
    }

    #[test]
    fn matching_normalizes_case_and_whitespace() {
        let items = vec![
            item("  Fried Chicken ", 0),
            item("FRIED CHICKEN", 1),
            item("fried chicken", 2),
            item("pizza", 3),
        ];
        let dish = DishSpec::new("Fried Chicken", 10).unwrap();
        let mut got = markers(&sample_dish(&items, &dish, 42));
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2]);
    }

    #[test]
    fn unmatched_dish_yields_zero_items() {
        let items = vec![item("pizza", 0)];
        let dish = DishSpec::new("sushi", 5).unwrap();
        assert!(sample_dish(&items, &dish, 42).is_empty());
    }

    #[test]
    fn truncation_happens_after_the_permutation() {
        // With quota 1 the selected item is whichever the permutation puts
        // first, not necessarily the first matching source item.
        let items: Vec<SourceItem> = (0..50).map(|i| item("apple", i)).collect();
        let dish = DishSpec::new("apple", 1).unwrap();

        let full = markers(&sample_dish(
            &items,
            &DishSpec::new("apple", 50).unwrap(),
            7,
        ));
        let one = markers(&sample_dish(&items, &dish, 7));
        assert_eq!(one, full[..1].to_vec());
    }
}
