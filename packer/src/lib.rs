//! Packing checklist library.
//! Turns free-text entry into categorized, checkable items, keeps the persisted item and
//! category lists consistent, and moves lists between devices through a share link.

pub mod core {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use uuid::Uuid;

    /* ------------------------------ Constants ------------------------------ */

    /// Catch-all category; always present and always ordered first.
    pub const DEFAULT_CATEGORY: &str = "Uncategorized";

    /// Seeded category for the things that go in the bag on the way out.
    pub const LAST_MINUTE_CATEGORY: &str = "Last-Minute";

    /// Category list a brand new session starts with.
    pub const DEFAULT_CATEGORIES: [&str; 2] = [DEFAULT_CATEGORY, LAST_MINUTE_CATEGORY];

    /// Offered by autocomplete even before the user has created them.
    pub const SUGGESTED_CATEGORIES: [&str; 5] =
        ["Clothing", "Toiletries", "Tech", "Documents", "Misc"];

    pub const ITEMS_KEY: &str = "packer.items.v1";
    pub const CATEGORIES_KEY: &str = "packer.categories.v1";

    /// Fragment key of a share payload (`#p=<encoded>`).
    pub const SHARE_HASH_KEY: &str = "p";

    /* ------------------------------- IDs ------------------------------- */

    /// Opaque item identifier. Fresh ids are UUIDv4 strings; ids coming from storage or a
    /// share link are kept verbatim.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ItemId(pub String);

    impl Default for ItemId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ItemId {
        pub fn new() -> Self {
            Self(Uuid::new_v4().to_string())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl fmt::Display for ItemId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<&str> for ItemId {
        fn from(s: &str) -> Self {
            Self(s.to_string())
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// One packable thing.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Item {
        pub id: ItemId,
        /// Trimmed, never empty.
        pub name: String,
        /// Always a normalized category name.
        pub category: String,
        pub checked: bool,
        /// Tie-break key within a category and checked state. Never displayed.
        pub order: f64,
    }

    /// Output of the text parser, before an id and order seed are assigned.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ParsedItem {
        pub name: String,
        pub category: String,
    }

    /* ---------------------------- Read models ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct CategoryGroup {
        pub category: String,
        pub items: Vec<Item>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct PackingStats {
        pub total: usize,
        pub checked: usize,
        /// Percentage of checked items, rounded; zero for an empty list.
        pub progress: u32,
    }

    impl PackingStats {
        pub fn from_items(items: &[Item]) -> Self {
            let total = items.len();
            let checked = items.iter().filter(|item| item.checked).count();
            let progress = if total == 0 {
                0
            } else {
                (checked as f64 / total as f64 * 100.0).round() as u32
            };
            Self {
                total,
                checked,
                progress,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct ShareResult {
        pub url: String,
        pub copied: bool,
    }
}

pub mod category {
    //! Category name canonicalization and list merging.

    use crate::core::{DEFAULT_CATEGORY, Item};
    use indexmap::IndexSet;
    use serde_json::Value;

    fn is_word_boundary(c: char) -> bool {
        c.is_whitespace() || c == '-' || c == '/'
    }

    fn is_word_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    /// Lower-cases every run of word characters after its first character. The first
    /// character is upper-cased when the run starts a word (start of text, or after
    /// whitespace, `-` or `/`) and kept as typed otherwise, so `o'NEIL` becomes `O'Neil`.
    pub fn title_case(value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut after_boundary = true;
        let mut in_run = false;
        for c in value.chars() {
            if !is_word_char(c) {
                out.push(c);
                after_boundary = is_word_boundary(c);
                in_run = false;
            } else if in_run {
                out.extend(c.to_lowercase());
            } else {
                if after_boundary {
                    out.extend(c.to_uppercase());
                } else {
                    out.push(c);
                }
                in_run = true;
                after_boundary = false;
            }
        }
        out
    }

    /// Canonical display form of a category. Total: every input maps to a non-empty name.
    pub fn normalize_category_name(raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.to_lowercase() == "general" {
            return DEFAULT_CATEGORY.to_string();
        }
        title_case(trimmed)
    }

    /// Normalizes an untrusted JSON value into a list of category names. Anything that is
    /// not an array of strings contributes nothing.
    pub fn normalize_category_list(list: &Value) -> Vec<String> {
        let Some(entries) = list.as_array() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(Value::as_str)
            .map(normalize_category_name)
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Drops every occurrence of the default category and puts exactly one in front.
    pub fn ensure_default_first<S: AsRef<str>>(list: &[S]) -> Vec<String> {
        let mut out = Vec::with_capacity(list.len() + 1);
        out.push(DEFAULT_CATEGORY.to_string());
        out.extend(
            list.iter()
                .map(AsRef::as_ref)
                .filter(|category| *category != DEFAULT_CATEGORY)
                .map(str::to_string),
        );
        out
    }

    /// `base` then `incoming`, normalized and de-duplicated; first occurrence keeps its slot.
    pub fn merge_categories<A, B>(base: &[A], incoming: &[B]) -> Vec<String>
    where
        A: AsRef<str>,
        B: AsRef<str>,
    {
        let merged: IndexSet<String> = base
            .iter()
            .map(AsRef::as_ref)
            .chain(incoming.iter().map(AsRef::as_ref))
            .map(normalize_category_name)
            .collect();
        merged.into_iter().collect()
    }

    pub fn are_lists_equal<S: AsRef<str>>(a: &[String], b: &[S]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y.as_ref())
    }

    /// Distinct normalized categories of `items`, in order of first appearance.
    pub fn categories_from_items(items: &[Item]) -> Vec<String> {
        let unique: IndexSet<String> = items
            .iter()
            .map(|item| normalize_category_name(&item.category))
            .collect();
        unique.into_iter().collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn blank_and_general_collapse_to_default() {
            for raw in ["", "   ", "General", "  general ", "GENERAL"] {
                assert_eq!(normalize_category_name(raw), DEFAULT_CATEGORY, "{raw:?}");
            }
        }

        #[test]
        fn title_cases_words_across_separators() {
            assert_eq!(normalize_category_name("  tOILETRIES "), "Toiletries");
            assert_eq!(normalize_category_name("last-minute"), "Last-Minute");
            assert_eq!(normalize_category_name("kids/baby gear"), "Kids/Baby Gear");
            assert_eq!(normalize_category_name("tech2GO"), "Tech2go");
            assert_eq!(normalize_category_name("o'neil"), "O'neil");
            assert_eq!(normalize_category_name("(snacks)"), "(snacks)");
        }

        #[test]
        fn runs_after_punctuation_are_lower_cased_but_keep_their_first_letter() {
            assert_eq!(normalize_category_name("o'NEIL"), "O'Neil");
            assert_eq!(normalize_category_name("(SNACKS)"), "(Snacks)");
            assert_eq!(normalize_category_name("BOOKS & MAPS"), "Books & Maps");
            assert_eq!(normalize_category_name("kid's/BABY"), "Kid's/Baby");
        }

        #[test]
        fn list_normalization_discards_non_text() {
            let raw = json!(["tech", 4, null, "  ", {"name": "x"}, "Misc"]);
            assert_eq!(
                normalize_category_list(&raw),
                vec!["Tech", DEFAULT_CATEGORY, "Misc"]
            );
            assert!(normalize_category_list(&json!("Tech")).is_empty());
        }

        #[test]
        fn default_first_is_idempotent() {
            let list = vec![
                "Tech".to_string(),
                DEFAULT_CATEGORY.to_string(),
                "Misc".to_string(),
                DEFAULT_CATEGORY.to_string(),
            ];
            let once = ensure_default_first(&list);
            assert_eq!(once, vec![DEFAULT_CATEGORY, "Tech", "Misc"]);
            assert_eq!(ensure_default_first(&once), once);
        }

        #[test]
        fn merge_dedups_by_normalized_value() {
            let merged = merge_categories(&["Tech"], &["tech", "Documents"]);
            assert_eq!(merged, vec!["Tech", "Documents"]);

            let merged = merge_categories(&["clothing", "general"], &["Clothing", ""]);
            assert_eq!(merged, vec!["Clothing", DEFAULT_CATEGORY]);
        }

        #[test]
        fn list_equality_is_order_sensitive() {
            let a = vec!["A".to_string(), "B".to_string()];
            assert!(are_lists_equal(&a, &["A", "B"]));
            assert!(!are_lists_equal(&a, &["B", "A"]));
            assert!(!are_lists_equal(&a, &["A"]));
        }
    }
}

pub mod parser {
    //! Free-text entry parser built on `nom`.
    //!
    //! Each line is tokenized on whitespace. The first `#tag` token names the category of
    //! every item on the line; later tags are dropped unless the earlier ones all resolved
    //! to the default category. What remains is split on commas,
    //! one item per piece. Both `Socks, Shirt #Clothing` and `#Clothing Socks, Shirt`
    //! produce the same items.

    use crate::category::normalize_category_name;
    use crate::core::{DEFAULT_CATEGORY, ParsedItem};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{take_till1, take_while},
        character::complete::char,
        combinator::map,
        multi::many0,
        sequence::preceded,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Token<'a> {
        /// `#name`, without the hash.
        Tag(&'a str),
        Word(&'a str),
    }

    type PResult<'a, T> = IResult<&'a str, T>;

    fn gap(i: &str) -> PResult<'_, &str> {
        take_while(|c: char| c.is_whitespace())(i)
    }

    fn tag_token(i: &str) -> PResult<'_, Token<'_>> {
        map(
            preceded(char('#'), take_till1(|c: char| c.is_whitespace())),
            Token::Tag,
        )(i)
    }

    // A lone `#` falls through to here and is kept as a word.
    fn word_token(i: &str) -> PResult<'_, Token<'_>> {
        map(take_till1(|c: char| c.is_whitespace()), Token::Word)(i)
    }

    fn tokens(i: &str) -> PResult<'_, Vec<Token<'_>>> {
        many0(preceded(gap, alt((tag_token, word_token))))(i)
    }

    /// Parse one line of entry text.
    pub fn parse_line(line: &str) -> Vec<ParsedItem> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let Ok((_, tokens)) = tokens(line) else {
            return Vec::new();
        };

        // A tag that resolves to the default category leaves the slot open for a later tag.
        let mut category = DEFAULT_CATEGORY.to_string();
        let mut words = Vec::with_capacity(tokens.len());
        for token in tokens {
            match token {
                Token::Tag(raw) => {
                    if category == DEFAULT_CATEGORY {
                        category = normalize_category_name(raw);
                    }
                }
                Token::Word(word) => words.push(word),
            }
        }

        let remaining = words.join(" ");
        if remaining.is_empty() {
            return Vec::new();
        }

        remaining
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| ParsedItem {
                name: name.to_string(),
                category: category.clone(),
            })
            .collect()
    }

    /// Parse multi-line entry text (`\n` or `\r\n` separated).
    pub fn parse_input(input: &str) -> Vec<ParsedItem> {
        input.lines().flat_map(parse_line).collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn names(items: &[ParsedItem]) -> Vec<&str> {
            items.iter().map(|item| item.name.as_str()).collect()
        }

        #[test]
        fn trailing_tag_applies_to_every_item() {
            let items = parse_input("Socks, Shirt, Pants #Clothing");
            assert_eq!(names(&items), vec!["Socks", "Shirt", "Pants"]);
            assert!(items.iter().all(|item| item.category == "Clothing"));
        }

        #[test]
        fn leading_tag_applies_to_every_item() {
            let items = parse_input("#Toiletries Toothbrush, Toothpaste");
            assert_eq!(names(&items), vec!["Toothbrush", "Toothpaste"]);
            assert!(items.iter().all(|item| item.category == "Toiletries"));
        }

        #[test]
        fn blank_input_yields_nothing() {
            assert!(parse_input("").is_empty());
            assert!(parse_input("   ").is_empty());
            assert!(parse_input("\n\r\n  \n").is_empty());
            assert!(parse_input("#Tech").is_empty());
            assert!(parse_input(" , ,, #Tech").is_empty());
        }

        #[test]
        fn only_first_tag_sets_category() {
            let items = parse_input("Charger #tech #misc cable");
            assert_eq!(names(&items), vec!["Charger cable"]);
            assert_eq!(items[0].category, "Tech");
        }

        #[test]
        fn default_resolving_tag_yields_to_a_later_tag() {
            let items = parse_input("Hat #general #Clothing");
            assert_eq!(items[0].category, "Clothing");
            let items = parse_input("Map #Uncategorized #travel");
            assert_eq!(items[0].category, "Travel");
            let items = parse_input("Pen #general");
            assert_eq!(items[0].category, DEFAULT_CATEGORY);
            assert_eq!(names(&items), vec!["Pen"]);
        }

        #[test]
        fn lone_hash_and_inner_hash_are_words() {
            let items = parse_input("Size # 10, tea#2");
            assert_eq!(names(&items), vec!["Size # 10", "tea#2"]);
            assert_eq!(items[0].category, DEFAULT_CATEGORY);
        }

        #[test]
        fn multi_line_paste_keeps_per_line_categories() {
            let items = parse_input("Passport #Documents\r\nCamera, Charger #Tech\nSunscreen");
            assert_eq!(names(&items), vec!["Passport", "Camera", "Charger", "Sunscreen"]);
            let categories: Vec<_> = items.iter().map(|i| i.category.as_str()).collect();
            assert_eq!(categories, vec!["Documents", "Tech", "Tech", DEFAULT_CATEGORY]);
        }

        #[test]
        fn whitespace_runs_collapse_inside_names() {
            let items = parse_input("  Rain\t  jacket ,\u{a0}Umbrella  ");
            assert_eq!(names(&items), vec!["Rain jacket", "Umbrella"]);
        }
    }
}

pub mod timer {
    //! Time sources, the debounce handle used for delayed resorting, and order seeds.

    use chrono::Utc;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    pub trait Clock {
        fn now(&self) -> Instant;
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> Instant {
            Instant::now()
        }
    }

    /// Clock that only moves when told to. Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now: Rc<Cell<Instant>>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: Rc::new(Cell::new(Instant::now())),
            }
        }

        pub fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.now.get()
        }
    }

    /// Cancellable single-shot deadline. Rescheduling replaces the pending deadline.
    #[derive(Debug, Clone)]
    pub struct Debounce {
        delay: Duration,
        due_at: Option<Instant>,
    }

    impl Debounce {
        pub fn new(delay: Duration) -> Self {
            Self {
                delay,
                due_at: None,
            }
        }

        pub fn schedule(&mut self, now: Instant) {
            self.due_at = Some(now + self.delay);
        }

        pub fn cancel(&mut self) {
            self.due_at = None;
        }

        pub fn is_pending(&self) -> bool {
            self.due_at.is_some()
        }

        /// Returns true exactly once per armed deadline, when `now` has reached it.
        pub fn take_if_due(&mut self, now: Instant) -> bool {
            match self.due_at {
                Some(due) if now >= due => {
                    self.due_at = None;
                    true
                }
                _ => false,
            }
        }
    }

    // Past this, adding 1.0 no longer yields a distinct f64.
    const MAX_EXACT_SEED: f64 = 9_007_199_254_740_992.0;

    /// Strictly increasing order seeds derived from wall-clock milliseconds.
    ///
    /// Several seeds requested within the same millisecond, or after the wall clock went
    /// backwards, are bumped past the previous one, so distinct items never tie.
    #[derive(Debug, Clone)]
    pub struct OrderSeeds {
        last: f64,
    }

    impl Default for OrderSeeds {
        fn default() -> Self {
            Self::new()
        }
    }

    impl OrderSeeds {
        pub fn new() -> Self {
            Self {
                last: f64::NEG_INFINITY,
            }
        }

        pub fn next(&mut self) -> f64 {
            self.next_at(Utc::now().timestamp_millis())
        }

        pub fn next_at(&mut self, unix_ms: i64) -> f64 {
            let candidate = unix_ms as f64;
            let seed = if candidate > self.last {
                candidate
            } else {
                self.last + 1.0
            };
            self.last = seed;
            seed
        }

        /// Make sure later seeds sort after an order value issued elsewhere.
        pub fn observe(&mut self, order: f64) {
            if order.is_finite() && order < MAX_EXACT_SEED && order > self.last {
                self.last = order;
            }
        }
    }

}

pub mod registry {
    //! Item construction and defensive reconstruction from untrusted JSON.

    use crate::category::normalize_category_name;
    use crate::core::{DEFAULT_CATEGORY, Item, ItemId};
    use crate::timer::OrderSeeds;
    use serde_json::Value;

    /// New item with a fresh id. `category` is expected to be normalized already.
    pub fn create_item(
        name: impl Into<String>,
        category: impl Into<String>,
        checked: bool,
        order: f64,
    ) -> Item {
        Item {
            id: ItemId::new(),
            name: name.into(),
            category: category.into(),
            checked,
            order,
        }
    }

    // Loose boolean coercion for `checked` written by older or foreign clients.
    fn truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0 && !x.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Rebuild an item from a loosely shaped record. Returns `None` when there is no usable
    /// name; every other field falls back to a default.
    pub fn normalize_item(candidate: &Value, seeds: &mut OrderSeeds) -> Option<Item> {
        let record = candidate.as_object()?;
        let name = record.get("name")?.as_str()?.trim();
        if name.is_empty() {
            return None;
        }

        let category = match record.get("category").and_then(Value::as_str).map(str::trim) {
            Some(raw) if !raw.is_empty() => normalize_category_name(raw),
            _ => DEFAULT_CATEGORY.to_string(),
        };
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => ItemId(id.to_string()),
            _ => ItemId::new(),
        };
        let checked = record.get("checked").is_some_and(truthy);
        let order = record
            .get("order")
            .and_then(Value::as_f64)
            .unwrap_or_else(|| seeds.next());

        Some(Item {
            id,
            name: name.to_string(),
            category,
            checked,
            order,
        })
    }

    /// Keep every candidate that survives [`normalize_item`], in input order.
    pub fn normalize_items(candidates: &[Value], seeds: &mut OrderSeeds) -> Vec<Item> {
        candidates
            .iter()
            .filter_map(|candidate| normalize_item(candidate, seeds))
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn blank_or_missing_name_is_rejected() {
            let mut seeds = OrderSeeds::new();
            assert!(normalize_item(&json!({"name": "  "}), &mut seeds).is_none());
            assert!(normalize_item(&json!({"category": "Tech"}), &mut seeds).is_none());
            assert!(normalize_item(&json!({"name": 12}), &mut seeds).is_none());
            assert!(normalize_item(&json!("Hat"), &mut seeds).is_none());
            assert!(normalize_item(&json!(null), &mut seeds).is_none());
        }

        #[test]
        fn non_text_category_falls_back_to_default() {
            let mut seeds = OrderSeeds::new();
            let item = normalize_item(&json!({"name": "Hat", "category": 123}), &mut seeds)
                .expect("valid item");
            assert_eq!(item.name, "Hat");
            assert_eq!(item.category, DEFAULT_CATEGORY);
            assert!(!item.checked);
            assert!(!item.id.as_str().is_empty());
        }

        #[test]
        fn present_fields_are_reused_and_normalized() {
            let mut seeds = OrderSeeds::new();
            let item = normalize_item(
                &json!({
                    "id": "abc",
                    "name": "  Socks ",
                    "category": " clothing ",
                    "checked": 1,
                    "order": 42.5
                }),
                &mut seeds,
            )
            .expect("valid item");
            assert_eq!(item.id, ItemId::from("abc"));
            assert_eq!(item.name, "Socks");
            assert_eq!(item.category, "Clothing");
            assert!(item.checked);
            assert_eq!(item.order, 42.5);
        }

        #[test]
        fn unusable_id_and_order_are_regenerated() {
            let mut seeds = OrderSeeds::new();
            let item = normalize_item(
                &json!({"id": "", "name": "Map", "order": "soon", "checked": ""}),
                &mut seeds,
            )
            .expect("valid item");
            assert!(!item.id.as_str().is_empty());
            assert!(item.order.is_finite());
            assert!(!item.checked);
        }

        #[test]
        fn malformed_entries_are_dropped_individually() {
            let mut seeds = OrderSeeds::new();
            let raw = vec![
                json!({"name": "Hat"}),
                json!({"name": ""}),
                json!(7),
                json!({"name": "Scarf", "category": "Clothing"}),
            ];
            let items = normalize_items(&raw, &mut seeds);
            let names: Vec<_> = items.iter().map(|item| item.name.as_str()).collect();
            assert_eq!(names, vec!["Hat", "Scarf"]);
        }
    }
}

pub mod ordering {
    //! Category display order and the total order over items.

    use crate::category::{categories_from_items, ensure_default_first, merge_categories};
    use crate::core::Item;
    use std::collections::HashMap;

    /// Known categories followed by any that only appear on items, default first.
    pub fn get_category_order<S: AsRef<str>>(items: &[Item], categories: &[S]) -> Vec<String> {
        ensure_default_first(&merge_categories(categories, &categories_from_items(items)))
    }

    /// Sort by category rank, then unchecked before checked, then ascending `order`.
    pub fn sort_items<S: AsRef<str>>(items: &[Item], categories: &[S]) -> Vec<Item> {
        if items.len() < 2 {
            return items.to_vec();
        }
        let order = get_category_order(items, categories);
        let rank: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(index, category)| (category.as_str(), index))
            .collect();
        let rank_of = |item: &Item| {
            rank.get(item.category.as_str())
                .copied()
                .unwrap_or(order.len())
        };

        let mut sorted = items.to_vec();
        sorted.sort_by(|a, b| {
            rank_of(a)
                .cmp(&rank_of(b))
                .then(a.checked.cmp(&b.checked))
                .then(a.order.total_cmp(&b.order))
        });
        sorted
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{DEFAULT_CATEGORY, ItemId};

        fn item(name: &str, category: &str, checked: bool, order: f64) -> Item {
            Item {
                id: ItemId::from(name),
                name: name.to_string(),
                category: category.to_string(),
                checked,
                order,
            }
        }

        fn names(items: &[Item]) -> Vec<&str> {
            items.iter().map(|item| item.name.as_str()).collect()
        }

        #[test]
        fn groups_by_category_then_checked_then_order() {
            let items = vec![
                item("shirt", "Clothing", false, 2.0),
                item("pen", DEFAULT_CATEGORY, true, 1.0),
                item("socks", "Clothing", true, 1.0),
                item("map", DEFAULT_CATEGORY, false, 5.0),
                item("hat", "Clothing", false, 1.0),
                item("book", DEFAULT_CATEGORY, false, 3.0),
            ];
            let sorted = sort_items(&items, &[DEFAULT_CATEGORY, "Clothing"]);
            assert_eq!(
                names(&sorted),
                vec!["book", "map", "pen", "hat", "shirt", "socks"]
            );
        }

        #[test]
        fn category_list_order_wins_over_item_order() {
            let items = vec![
                item("a", "Tech", false, 1.0),
                item("b", "Misc", false, 2.0),
            ];
            let sorted = sort_items(&items, &["Misc", "Tech"]);
            assert_eq!(names(&sorted), vec!["b", "a"]);
        }

        #[test]
        fn unlisted_categories_follow_in_first_seen_order() {
            let items = vec![
                item("a", "Zoo", false, 1.0),
                item("b", "Tech", false, 2.0),
                item("c", DEFAULT_CATEGORY, false, 3.0),
            ];
            assert_eq!(
                get_category_order(&items, &["Tech"]),
                vec![DEFAULT_CATEGORY, "Tech", "Zoo"]
            );
            assert_eq!(names(&sort_items(&items, &["Tech"])), vec!["c", "b", "a"]);
        }

        #[test]
        fn short_inputs_are_returned_as_is() {
            let single = vec![item("a", "Tech", true, 1.0)];
            assert_eq!(sort_items(&single, &[] as &[&str]), single);
            assert!(sort_items(&[], &["Tech"]).is_empty());
        }

        #[test]
        fn input_is_not_mutated() {
            let items = vec![
                item("b", "Tech", false, 2.0),
                item("a", "Tech", false, 1.0),
            ];
            let _ = sort_items(&items, &["Tech"]);
            assert_eq!(names(&items), vec!["b", "a"]);
        }
    }
}

pub mod storage {
    //! Durable key-value storage behind the session.

    use indexmap::IndexMap;
    use serde_json::Value;
    use std::{
        fs,
        io::{self, Write},
        path::{Path, PathBuf},
    };

    #[derive(Debug, thiserror::Error)]
    pub enum StoreError {
        #[error("storage is unavailable")]
        Unavailable,
        #[error("i/o error on {path:?}: {source}")]
        Io {
            path: PathBuf,
            #[source]
            source: io::Error,
        },
    }

    pub trait KeyValueStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
        fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    }

    /// Read and parse a JSON value. Absent keys, read failures and malformed JSON all read
    /// as `None`.
    pub fn read_json<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Option<Value> {
        let text = match store.get(key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key, %err, "storage read failed");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(key, %err, "ignoring malformed stored value");
                None
            }
        }
    }

    /* ------------------------------ Files ------------------------------ */

    /// One JSON file per key in a directory. Writes go through a temp file that is renamed
    /// over the target.
    #[derive(Debug, Clone)]
    pub struct FileStore {
        dir: PathBuf,
    }

    impl FileStore {
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }

        pub fn dir(&self) -> &Path {
            &self.dir
        }

        pub fn path_for(&self, key: &str) -> PathBuf {
            self.dir.join(format!("{key}.json"))
        }

        fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
            move |source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    impl KeyValueStore for FileStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let path = self.path_for(key);
            match fs::read_to_string(&path) {
                Ok(text) => Ok(Some(text)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(Self::io_error(&path)(err)),
            }
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            fs::create_dir_all(&self.dir).map_err(Self::io_error(&self.dir))?;
            let path = self.path_for(key);
            let mut temp =
                tempfile::NamedTempFile::new_in(&self.dir).map_err(Self::io_error(&self.dir))?;
            temp.write_all(value.as_bytes())
                .map_err(Self::io_error(temp.path()))?;
            temp.persist(&path)
                .map_err(|err| Self::io_error(&path)(err.error))?;
            Ok(())
        }

        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            let path = self.path_for(key);
            match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(Self::io_error(&path)(err)),
            }
        }
    }

    /* ------------------------------ Memory ------------------------------ */

    #[derive(Debug, Clone, Default)]
    pub struct MemoryStore {
        entries: IndexMap<String, String>,
        unavailable: bool,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// A store whose every call fails, like a browser with storage disabled.
        pub fn unavailable() -> Self {
            Self {
                entries: IndexMap::new(),
                unavailable: true,
            }
        }

        pub fn with_entry(mut self, key: &str, value: &str) -> Self {
            self.entries.insert(key.to_string(), value.to_string());
            self
        }

        pub fn raw(&self, key: &str) -> Option<&str> {
            self.entries.get(key).map(String::as_str)
        }
    }

    impl KeyValueStore for MemoryStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            if self.unavailable {
                return Err(StoreError::Unavailable);
            }
            Ok(self.entries.get(key).cloned())
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.unavailable {
                return Err(StoreError::Unavailable);
            }
            self.entries.insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            if self.unavailable {
                return Err(StoreError::Unavailable);
            }
            self.entries.shift_remove(key);
            Ok(())
        }
    }

}

pub mod share {
    //! Share links: the compressed item payload, the navigational location it rides in,
    //! and the clipboard it is copied to.

    use crate::core::{Item, SHARE_HASH_KEY};
    use crate::registry::normalize_items;
    use crate::timer::OrderSeeds;
    use anyhow::{Context, Result, anyhow};
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use flate2::Compression;
    use flate2::read::ZlibDecoder;
    use flate2::write::ZlibEncoder;
    use serde_json::Value;
    use std::io::{Read, Write};
    use std::process::{Command, Stdio};

    const MAX_PAYLOAD_JSON_BYTES: usize = 1024 * 1024;

    /* ------------------------------ Location ------------------------------ */

    /// The "current URL", split into origin plus path, the `?query` (or empty) and the
    /// fragment (`#...`, or empty).
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Location {
        base: String,
        search: String,
        hash: String,
    }

    impl Location {
        pub fn parse(url: &str) -> Self {
            let (rest, hash) = match url.split_once('#') {
                Some((rest, fragment)) if !fragment.is_empty() => (rest, format!("#{fragment}")),
                Some((rest, _)) => (rest, String::new()),
                None => (url, String::new()),
            };
            let (base, search) = match rest.split_once('?') {
                Some((base, query)) if !query.is_empty() => (base, format!("?{query}")),
                Some((base, _)) => (base, String::new()),
                None => (rest, String::new()),
            };
            Self {
                base: base.to_string(),
                search,
                hash,
            }
        }

        /// Origin and path, without query or fragment.
        pub fn base(&self) -> &str {
            &self.base
        }

        pub fn search(&self) -> &str {
            &self.search
        }

        pub fn hash(&self) -> &str {
            &self.hash
        }

        pub fn href(&self) -> String {
            format!("{}{}{}", self.base, self.search, self.hash)
        }

        /// Point the location at `base` with the given fragment (no leading `#`). The query
        /// is dropped.
        pub fn replace_hash(&mut self, fragment: &str) {
            self.search.clear();
            self.hash = if fragment.is_empty() {
                String::new()
            } else {
                format!("#{fragment}")
            };
        }

        /// Point the location at the bare `base`.
        pub fn clear_hash(&mut self) {
            self.search.clear();
            self.hash.clear();
        }
    }

    /* ------------------------------ Clipboard ------------------------------ */

    pub trait Clipboard {
        fn write_text(&mut self, text: &str) -> Result<()>;
    }

    /// No clipboard at all; every write fails.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NoClipboard;

    impl Clipboard for NoClipboard {
        fn write_text(&mut self, _text: &str) -> Result<()> {
            Err(anyhow!("no clipboard available"))
        }
    }

    /// Pipes the text into an external program such as `wl-copy` or `pbcopy`.
    #[derive(Debug, Clone)]
    pub struct CommandClipboard {
        argv: Vec<String>,
    }

    impl CommandClipboard {
        pub fn new(argv: Vec<String>) -> Self {
            Self { argv }
        }
    }

    impl Clipboard for CommandClipboard {
        fn write_text(&mut self, text: &str) -> Result<()> {
            let (program, args) = self
                .argv
                .split_first()
                .ok_or_else(|| anyhow!("clipboard command is empty"))?;
            let mut child = Command::new(program)
                .args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .with_context(|| format!("spawning clipboard command {program:?}"))?;
            {
                let mut stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| anyhow!("clipboard command has no stdin"))?;
                stdin
                    .write_all(text.as_bytes())
                    .with_context(|| format!("writing to {program:?}"))?;
            }
            let status = child
                .wait()
                .with_context(|| format!("waiting for {program:?}"))?;
            if !status.success() {
                anyhow::bail!("clipboard command {program:?} exited with {status}");
            }
            Ok(())
        }
    }

    /* ------------------------------- Codec ------------------------------- */

    /// `#p=`
    pub fn share_prefix() -> String {
        format!("#{SHARE_HASH_KEY}=")
    }

    fn compress_zlib(bytes: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(bytes).context("compress share payload")?;
        encoder.finish().context("finish share payload compression")
    }

    fn decompress_zlib_with_limit(bytes: &[u8], max_len: usize) -> Result<Vec<u8>> {
        let decoder = ZlibDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .take(max_len.saturating_add(1) as u64)
            .read_to_end(&mut out)
            .context("decompress share payload")?;
        if out.len() > max_len {
            anyhow::bail!("share payload too large ({} bytes)", out.len());
        }
        Ok(out)
    }

    fn try_encode(items: &[Item]) -> Result<String> {
        let json = serde_json::to_vec(items).context("serialize items")?;
        let compressed = compress_zlib(&json)?;
        Ok(URL_SAFE_NO_PAD.encode(compressed))
    }

    fn try_decode(encoded: &str) -> Result<Vec<Value>> {
        let compressed = URL_SAFE_NO_PAD
            .decode(encoded.trim().as_bytes())
            .context("decode base64")?;
        let json = decompress_zlib_with_limit(&compressed, MAX_PAYLOAD_JSON_BYTES)?;
        let parsed: Value = serde_json::from_slice(&json).context("parse share payload json")?;
        match parsed {
            Value::Array(entries) => Ok(entries),
            _ => anyhow::bail!("share payload is not a list"),
        }
    }

    /// URL-safe compressed form of `items`, without the `#p=` prefix. Empty on failure.
    pub fn encode_items_to_hash(items: &[Item]) -> String {
        match try_encode(items) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(%err, "failed to encode share payload");
                String::new()
            }
        }
    }

    /// Items carried by a `#p=<encoded>` fragment. `None` when the prefix is missing, the
    /// payload does not decode, or nothing valid survives normalization.
    pub fn decode_items_from_hash(hash: &str, seeds: &mut OrderSeeds) -> Option<Vec<Item>> {
        let encoded = hash.strip_prefix(share_prefix().as_str())?;
        if encoded.is_empty() {
            return None;
        }
        let entries = match try_decode(encoded) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(%err, "ignoring undecodable share payload");
                return None;
            }
        };
        let items = normalize_items(&entries, seeds);
        (!items.is_empty()).then_some(items)
    }

    /// Link that reconstructs `items` elsewhere. Falls back to the bare location when there
    /// is nothing to share or encoding fails.
    pub fn generate_share_url(items: &[Item], location: &Location) -> String {
        if items.is_empty() {
            return location.href();
        }
        let encoded = encode_items_to_hash(items);
        if encoded.is_empty() {
            return location.href();
        }
        format!("{}{}{}", location.base(), share_prefix(), encoded)
    }

}

pub mod suggest {
    //! Category autocomplete for the entry box: detect a `#partial` left of the caret,
    //! offer matching categories, and splice the chosen one back in.

    use crate::core::{DEFAULT_CATEGORY, SUGGESTED_CATEGORIES};
    use indexmap::IndexSet;

    pub const MAX_SUGGESTIONS: usize = 6;

    /// An in-progress `#tag` in the draft. Positions are char indices; `start` points at
    /// the `#`, `end` at the caret.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CategoryQuery {
        pub query: String,
        pub start: usize,
        pub end: usize,
    }

    /// Known categories then the built-in suggestions, without the default category.
    pub fn category_suggestions<S: AsRef<str>>(category_list: &[S]) -> Vec<String> {
        let merged: IndexSet<&str> = category_list
            .iter()
            .map(AsRef::as_ref)
            .chain(SUGGESTED_CATEGORIES)
            .filter(|category| *category != DEFAULT_CATEGORY)
            .collect();
        merged.into_iter().map(str::to_string).collect()
    }

    pub fn category_query(draft: &str, caret: usize) -> Option<CategoryQuery> {
        let left: String = draft.chars().take(caret).collect();
        let hash_at = left.rfind('#')?;
        let partial = &left[hash_at + 1..];
        if partial.chars().any(char::is_whitespace) {
            return None;
        }
        let before = &left[..hash_at];
        if !(before.is_empty() || before.ends_with(char::is_whitespace)) {
            return None;
        }
        Some(CategoryQuery {
            query: partial.to_string(),
            start: before.chars().count(),
            end: left.chars().count(),
        })
    }

    /// Case-insensitive prefix matches, capped at [`MAX_SUGGESTIONS`].
    pub fn filter_suggestions(suggestions: &[String], query: &str) -> Vec<String> {
        let query = query.to_lowercase();
        suggestions
            .iter()
            .filter(|category| category.to_lowercase().starts_with(&query))
            .take(MAX_SUGGESTIONS)
            .cloned()
            .collect()
    }

    /// Replace the query span with `#category`, adding a space unless one follows already.
    /// Returns the new draft and the caret position after the inserted tag.
    pub fn apply_suggestion(draft: &str, query: &CategoryQuery, category: &str) -> (String, usize) {
        let chars: Vec<char> = draft.chars().collect();
        let start = query.start.min(chars.len());
        let end = query.end.clamp(start, chars.len());
        let before: String = chars[..start].iter().collect();
        let after: String = chars[end..].iter().collect();
        let spacer = if after.starts_with(' ') { "" } else { " " };

        let head = format!("{before}#{category}{spacer}");
        let caret = head.chars().count();
        (format!("{head}{after}"), caret)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn suggestions_skip_default_and_duplicates() {
            let list = vec![
                DEFAULT_CATEGORY.to_string(),
                "Tech".to_string(),
                "Snacks".to_string(),
            ];
            assert_eq!(
                category_suggestions(&list),
                vec!["Tech", "Snacks", "Clothing", "Toiletries", "Documents", "Misc"]
            );
        }

        #[test]
        fn query_requires_hash_at_word_start() {
            assert_eq!(
                category_query("Socks #Cl", 9),
                Some(CategoryQuery {
                    query: "Cl".to_string(),
                    start: 6,
                    end: 9,
                })
            );
            assert_eq!(category_query("#", 1).map(|q| q.query), Some(String::new()));
            assert_eq!(category_query("tea#2", 5), None);
            assert_eq!(category_query("#Tech socks", 11), None);
            assert_eq!(category_query("no tag", 6), None);
        }

        #[test]
        fn query_uses_char_positions() {
            let q = category_query("Café #Te", 8).expect("query");
            assert_eq!((q.start, q.end), (5, 8));
        }

        #[test]
        fn filters_by_prefix_and_caps() {
            let all: Vec<String> = (0..10).map(|n| format!("Cat{n}")).collect();
            assert_eq!(filter_suggestions(&all, "cat").len(), MAX_SUGGESTIONS);
            let list = category_suggestions(&["Tech".to_string()]);
            assert_eq!(filter_suggestions(&list, "t"), vec!["Tech", "Toiletries"]);
        }

        #[test]
        fn applying_inserts_tag_and_space() {
            let draft = "Socks #cl";
            let query = category_query(draft, 9).expect("query");
            assert_eq!(
                apply_suggestion(draft, &query, "Clothing"),
                ("Socks #Clothing ".to_string(), 16)
            );

            let draft = "#cl Socks";
            let query = category_query(draft, 3).expect("query");
            assert_eq!(
                apply_suggestion(draft, &query, "Clothing"),
                ("#Clothing Socks".to_string(), 9)
            );
        }
    }
}

pub mod config {
    //! User configuration loaded from TOML.

    use serde::{Deserialize, Serialize};
    use serde_with::{DurationMilliSeconds, serde_as};
    use std::{
        fs, io,
        path::{Path, PathBuf},
        time::Duration,
    };

    pub const DEFAULT_SHARE_BASE_URL: &str = "https://packer.local/";
    pub const DEFAULT_SORT_DELAY: Duration = Duration::from_millis(800);
    pub const DEFAULT_SHARE_NOTE: Duration = Duration::from_millis(2400);

    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        #[error("failed to read {path:?}: {source}")]
        Read {
            path: PathBuf,
            #[source]
            source: io::Error,
        },
        #[error("failed to parse {path:?}: {source}")]
        Parse {
            path: PathBuf,
            #[source]
            source: toml::de::Error,
        },
    }

    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Config {
        /// Directory holding the item and category files.
        pub data_dir: Option<PathBuf>,
        /// Location share links are built on.
        pub share_base_url: String,
        /// Delay before re-sorting after a check/uncheck.
        #[serde(rename = "sort_delay_ms")]
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        pub sort_delay: Duration,
        /// How long the share note stays visible.
        #[serde(rename = "share_note_ms")]
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        pub share_note: Duration,
        /// Program (and args) that receives share URLs on stdin.
        pub clipboard_command: Option<Vec<String>>,
    }

    impl Default for Config {
        fn default() -> Self {
            Self {
                data_dir: None,
                share_base_url: DEFAULT_SHARE_BASE_URL.to_string(),
                sort_delay: DEFAULT_SORT_DELAY,
                share_note: DEFAULT_SHARE_NOTE,
                clipboard_command: None,
            }
        }
    }

    impl Config {
        pub fn default_path() -> Option<PathBuf> {
            dirs::config_dir().map(|dir| dir.join("packer").join("config.toml"))
        }

        /// Load `explicit` if given (it must exist), else the default path if it exists,
        /// else defaults.
        pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
            match explicit {
                Some(path) => Self::load_from(path),
                None => match Self::default_path() {
                    Some(path) if path.exists() => Self::load_from(&path),
                    _ => Ok(Self::default()),
                },
            }
        }

        pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
        }

        pub fn resolve_data_dir(&self) -> PathBuf {
            self.data_dir
                .clone()
                .or_else(|| dirs::data_dir().map(|dir| dir.join("packer")))
                .unwrap_or_else(|| PathBuf::from(".packer"))
        }
    }

}

pub mod state;

pub use crate::core::{DEFAULT_CATEGORY, Item, ItemId, LAST_MINUTE_CATEGORY};
pub use parser::parse_input;
pub use state::{Hydration, PackingSession, SessionSettings};
