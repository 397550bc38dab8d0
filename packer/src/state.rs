//! Session state: the single owner of the persisted item and category lists.
//!
//! Every mutation goes through [`PackingSession`], which writes the affected list back to
//! the durable store and then reconciles the category list against the items so that no
//! item category is ever missing from it. Hydration (restoring from storage or importing a
//! share payload) happens at most once per session.

use crate::category::{
    are_lists_equal, categories_from_items, ensure_default_first, merge_categories,
    normalize_category_list, normalize_category_name,
};
use crate::config::{Config, DEFAULT_SHARE_NOTE, DEFAULT_SORT_DELAY};
use crate::core::{
    CATEGORIES_KEY, CategoryGroup, DEFAULT_CATEGORIES, ITEMS_KEY, Item, ItemId,
    LAST_MINUTE_CATEGORY, PackingStats, ShareResult,
};
use crate::ordering::{get_category_order, sort_items};
use crate::parser::parse_input;
use crate::registry::{create_item, normalize_items};
use crate::share::{Clipboard, Location, NoClipboard, decode_items_from_hash, generate_share_url};
use crate::storage::{KeyValueStore, read_json};
use crate::timer::{Clock, Debounce, OrderSeeds, SystemClock};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const NOTE_COPIED: &str = "Link copied.";
pub const NOTE_READY: &str = "Share URL ready.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub sort_delay: Duration,
    pub share_note: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sort_delay: DEFAULT_SORT_DELAY,
            share_note: DEFAULT_SHARE_NOTE,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            sort_delay: config.sort_delay,
            share_note: config.share_note,
        }
    }
}

/// What [`PackingSession::hydrate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    /// The session was already hydrated; nothing changed.
    Skipped,
    /// A share payload replaced the working items.
    Imported { items: usize },
    /// The stored items were re-normalized and re-sorted.
    Restored { items: usize },
}

#[derive(Debug, Clone)]
struct ShareNote {
    text: &'static str,
    expires_at: Instant,
}

/// The starter list used on first run and by [`PackingSession::reset_to_default`].
pub fn seed_items(seeds: &mut OrderSeeds) -> Vec<Item> {
    [
        ("Passport", "Documents"),
        ("Phone charger", "Tech"),
        ("Socks", "Clothing"),
        ("Water bottle", "Misc"),
        ("Toothbrush", LAST_MINUTE_CATEGORY),
        ("Wallet", LAST_MINUTE_CATEGORY),
    ]
    .into_iter()
    .map(|(name, category)| create_item(name, category, false, seeds.next()))
    .collect()
}

fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}

pub struct PackingSession<S, C = SystemClock> {
    store: S,
    clock: C,
    location: Location,
    clipboard: Box<dyn Clipboard>,
    settings: SessionSettings,
    items: Vec<Item>,
    category_list: Vec<String>,
    seeds: OrderSeeds,
    hydrated: bool,
    sort_timer: Debounce,
    share_note: Option<ShareNote>,
}

impl<S: KeyValueStore> PackingSession<S, SystemClock> {
    pub fn open(store: S, location: Location) -> Self {
        Self::with_clock(store, location, SystemClock, SessionSettings::default())
    }
}

impl<S: KeyValueStore, C: Clock> PackingSession<S, C> {
    /// Load both lists from `store`. Absent or unreadable values fall back to the seed
    /// lists; stored items are normalized entry by entry.
    pub fn with_clock(store: S, location: Location, clock: C, settings: SessionSettings) -> Self {
        let mut seeds = OrderSeeds::new();

        let items = match read_json(&store, ITEMS_KEY) {
            Some(Value::Array(entries)) => normalize_items(&entries, &mut seeds),
            _ => {
                debug!("no stored items, starting from the seed list");
                seed_items(&mut seeds)
            }
        };
        for item in &items {
            seeds.observe(item.order);
        }

        let category_list = match read_json(&store, CATEGORIES_KEY) {
            Some(list @ Value::Array(_)) => normalize_category_list(&list),
            _ => default_categories(),
        };

        Self {
            store,
            clock,
            location,
            clipboard: Box::new(NoClipboard),
            settings,
            items,
            category_list,
            seeds,
            hydrated: false,
            sort_timer: Debounce::new(settings.sort_delay),
            share_note: None,
        }
    }

    pub fn with_clipboard(mut self, clipboard: Box<dyn Clipboard>) -> Self {
        self.clipboard = clipboard;
        self
    }

    /* ------------------------------ Read side ------------------------------ */

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn category_list(&self) -> &[String] {
        &self.category_list
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn sort_pending(&self) -> bool {
        self.sort_timer.is_pending()
    }

    pub fn share_note(&self) -> Option<&'static str> {
        self.share_note.as_ref().map(|note| note.text)
    }

    /// Items grouped by category in display order. Empty categories are included.
    pub fn categories(&self) -> Vec<CategoryGroup> {
        get_category_order(&self.items, &self.category_list)
            .into_iter()
            .map(|category| CategoryGroup {
                items: self
                    .items
                    .iter()
                    .filter(|item| item.category == category)
                    .cloned()
                    .collect(),
                category,
            })
            .collect()
    }

    pub fn stats(&self) -> PackingStats {
        PackingStats::from_items(&self.items)
    }

    pub fn share_url(&self) -> String {
        generate_share_url(&self.items, &self.location)
    }

    /* ------------------------------ Persistence ------------------------------ */

    fn persist<T: Serialize + ?Sized>(store: &mut S, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .context("serialize")
            .and_then(|text| store.set(key, &text).context("write"));
        if let Err(err) = result {
            warn!(key, err = %format!("{err:#}"), "failed to persist, keeping in-memory state");
        }
    }

    fn forget(&mut self, key: &str) {
        if let Err(err) = self.store.remove(key) {
            warn!(key, %err, "failed to clear stored value");
        }
    }

    fn set_category_list(&mut self, next: Vec<String>) {
        self.category_list = next;
        Self::persist(&mut self.store, CATEGORIES_KEY, &self.category_list);
    }

    fn set_items(&mut self, next: Vec<Item>) {
        self.items = next;
        Self::persist(&mut self.store, ITEMS_KEY, &self.items);
        self.reconcile_categories();
    }

    /// Pull every item category into the category list, default first. Only writes when
    /// the list actually changes.
    fn reconcile_categories(&mut self) {
        let next = ensure_default_first(&merge_categories(
            &self.category_list,
            &categories_from_items(&self.items),
        ));
        if !are_lists_equal(&next, &self.category_list) {
            debug!(categories = ?next, "category list reconciled");
            self.set_category_list(next);
        }
    }

    fn resort(&mut self) {
        let sorted = sort_items(&self.items, &self.category_list);
        self.set_items(sorted);
    }

    /* ------------------------------ Hydration ------------------------------ */

    /// One-time startup step. A non-empty share payload in the location replaces the
    /// working items and merges its categories in; otherwise the stored items are
    /// re-sorted and the default categories merged in. Later calls do nothing.
    pub fn hydrate(&mut self) -> Hydration {
        if self.hydrated {
            return Hydration::Skipped;
        }
        self.hydrated = true;

        let known = self.category_list.clone();
        if let Some(imported) = decode_items_from_hash(self.location.hash(), &mut self.seeds) {
            for item in &imported {
                self.seeds.observe(item.order);
            }
            let count = imported.len();
            debug!(count, "importing items from share payload");
            self.set_category_list(ensure_default_first(&merge_categories(
                &known,
                &categories_from_items(&imported),
            )));
            self.set_items(sort_items(&imported, &known));
            return Hydration::Imported { items: count };
        }

        self.set_category_list(ensure_default_first(&merge_categories(
            &known,
            &DEFAULT_CATEGORIES,
        )));
        let restored = sort_items(&self.items, &known);
        let count = restored.len();
        debug!(count, "restored items from storage");
        self.set_items(restored);
        Hydration::Restored { items: count }
    }

    /* ------------------------------ Mutations ------------------------------ */

    /// Parse `text` and append the resulting items. Returns how many were added; zero
    /// means the text held nothing to add.
    pub fn add_items(&mut self, text: &str) -> usize {
        let parsed = parse_input(text);
        if parsed.is_empty() {
            return 0;
        }

        let fresh: Vec<Item> = parsed
            .iter()
            .map(|entry| create_item(&entry.name, &entry.category, false, self.seeds.next()))
            .collect();
        let count = fresh.len();

        let parsed_categories: Vec<&str> =
            parsed.iter().map(|entry| entry.category.as_str()).collect();
        let categories =
            ensure_default_first(&merge_categories(&self.category_list, &parsed_categories));
        self.set_category_list(categories);

        let mut merged = self.items.clone();
        merged.extend(fresh);
        let sorted = sort_items(&merged, &self.category_list);
        self.set_items(sorted);

        debug!(count, "added items");
        count
    }

    /// Flip the checked state of one item. The list is not re-sorted right away; a resort
    /// is scheduled after the sort delay, and another toggle before then pushes it back.
    pub fn toggle_item(&mut self, id: &ItemId) -> bool {
        let mut next = self.items.clone();
        let Some(item) = next.iter_mut().find(|item| &item.id == id) else {
            return false;
        };
        item.checked = !item.checked;
        self.set_items(next);
        self.sort_timer.schedule(self.clock.now());
        true
    }

    pub fn delete_item(&mut self, id: &ItemId) -> bool {
        let before = self.items.len();
        let next: Vec<Item> = self
            .items
            .iter()
            .filter(|item| &item.id != id)
            .cloned()
            .collect();
        if next.len() == before {
            return false;
        }
        self.set_items(next);
        true
    }

    /// Delete a category together with every item in it. Returns the number of items
    /// removed.
    pub fn delete_category(&mut self, name: &str) -> usize {
        let category = normalize_category_name(name);
        let remaining_categories: Vec<String> = self
            .category_list
            .iter()
            .filter(|existing| **existing != category)
            .cloned()
            .collect();
        let remaining_items: Vec<Item> = self
            .items
            .iter()
            .filter(|item| item.category != category)
            .cloned()
            .collect();
        let removed = self.items.len() - remaining_items.len();

        self.set_category_list(remaining_categories);
        self.set_items(remaining_items);
        debug!(%category, removed, "deleted category");
        removed
    }

    /// Move an item to `category` (blank means the default category). The item gets a
    /// fresh order seed so it lands at the end of its new group. Returns whether the item's
    /// category changed.
    pub fn move_item_to_category(&mut self, id: &ItemId, category: &str) -> bool {
        let target = normalize_category_name(category);
        let mut next = self.items.clone();
        let changed = match next.iter_mut().find(|item| &item.id == id) {
            Some(item) if item.category != target => {
                item.category = target.clone();
                item.order = self.seeds.next();
                true
            }
            _ => false,
        };

        if changed {
            let sorted = sort_items(&next, &self.category_list);
            self.set_items(sorted);
        }
        let categories = ensure_default_first(&merge_categories(&self.category_list, &[target]));
        if !are_lists_equal(&categories, &self.category_list) {
            self.set_category_list(categories);
        }
        changed
    }

    /// Empty the item list. Categories are left alone; any share payload is dropped from
    /// the location so it cannot re-import.
    pub fn reset_items(&mut self) {
        self.forget(ITEMS_KEY);
        self.location.clear_hash();
        self.sort_timer.cancel();
        self.set_items(Vec::new());
    }

    /// Forget everything and start over from the seed lists.
    pub fn reset_to_default(&mut self) {
        self.forget(ITEMS_KEY);
        self.forget(CATEGORIES_KEY);
        self.location.clear_hash();
        self.sort_timer.cancel();
        let seeds = seed_items(&mut self.seeds);
        self.set_category_list(default_categories());
        self.set_items(seeds);
    }

    /// Build the share URL, write its fragment into the location and try the clipboard.
    pub fn share(&mut self) -> ShareResult {
        let url = self.share_url();
        if let Some((_, fragment)) = url.split_once('#') {
            if !fragment.is_empty() {
                self.location.replace_hash(fragment);
            }
        }

        let copied = match self.clipboard.write_text(&url) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "clipboard write failed");
                false
            }
        };
        self.share_note = Some(ShareNote {
            text: if copied { NOTE_COPIED } else { NOTE_READY },
            expires_at: self.clock.now() + self.settings.share_note,
        });
        ShareResult { url, copied }
    }

    /* ------------------------------ Timers ------------------------------ */

    /// Run whatever timers are due. Returns true when a debounced resort ran.
    pub fn tick(&mut self) -> bool {
        let now = self.clock.now();
        if self
            .share_note
            .as_ref()
            .is_some_and(|note| now >= note.expires_at)
        {
            self.share_note = None;
        }
        if self.sort_timer.take_if_due(now) {
            debug!("running debounced resort");
            self.resort();
            return true;
        }
        false
    }

    /// Cancel anything pending. Call when the session goes away.
    pub fn teardown(&mut self) {
        self.sort_timer.cancel();
        self.share_note = None;
    }

    pub fn into_store(mut self) -> S {
        self.teardown();
        self.store
    }
}
