//! Mapped diagnostic context.
//!
//! A string-to-string store scoped to one logical unit of work. Code anywhere
//! inside that unit reads and writes it without the store being passed
//! around, and the logger pipeline copies it into every record.
//!
//! There are two ways to enter a context:
//!
//! - **Scoped** ([`run_with_context`], [`run_with_context_sync`],
//!   [`run_with_inherited`]): the body gets its own store and the caller's
//!   context is restored when the body finishes, returns early, or unwinds.
//!   Prefer these.
//! - **Mutate-forward** ([`put`], [`put_all`], [`clear`]): mutate whatever
//!   context is current. Inside a scope this is that scope's store. Outside any
//!   scope it is an ambient store owned by the current tokio task (or by the
//!   current thread when no task is running), which stays in effect for the
//!   rest of that task until something clears it.
//!
//! # Leak risk
//!
//! Unrelated tasks never share an ambient store, and a task keeps its store
//! when it moves between worker threads. Sibling tasks that share one scope,
//! however, see each other's `put`s. The ambient store of a task is released
//! only by [`clear`]; a task that `put`s outside a scope and never clears keeps
//! its store alive after it finishes. Open a scope per request and only use
//! `put` inside it.
//!
//! Tokio does not carry task-locals into spawned tasks. Use [`spawn`] or
//! [`in_current_context`] to hand a copy of the current context to a child.
//!
//! ```rust
//! use brightline_telemetry::mdc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! mdc::run_with_context([("request_id", "r-1")], async {
//!     mdc::put("user", "alice");
//!     assert_eq!(mdc::get("request_id").as_deref(), Some("r-1"));
//!     assert_eq!(mdc::get("user").as_deref(), Some("alice"));
//! })
//! .await;
//!
//! assert_eq!(mdc::get("request_id"), None);
//! # }
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use tokio::task::Id as TaskId;

/// Key-value pairs of one diagnostic context.
pub type ContextMap = BTreeMap<String, String>;

type Store = Arc<ContextMap>;

tokio::task_local! {
    static SCOPED: RefCell<Store>;
}

/// Ambient stores of tasks that wrote outside any scope.
static TASK_AMBIENT: LazyLock<Mutex<HashMap<TaskId, Store>>> = LazyLock::new(Mutex::default);

thread_local! {
    /// Ambient store for code that runs outside any task.
    static THREAD_AMBIENT: RefCell<Option<Store>> = const { RefCell::new(None) };
}

fn task_stores() -> MutexGuard<'static, HashMap<TaskId, Store>> {
    TASK_AMBIENT.lock().unwrap_or_else(PoisonError::into_inner)
}

fn in_scope() -> bool {
    SCOPED.try_with(|_| ()).is_ok()
}

fn ambient() -> Option<Store> {
    match tokio::task::try_id() {
        Some(id) => task_stores().get(&id).cloned(),
        None => THREAD_AMBIENT
            .try_with(|cell| cell.borrow().clone())
            .ok()
            .flatten(),
    }
}

/// The store visible to the caller, if any.
fn current() -> Option<Store> {
    SCOPED
        .try_with(|cell| Arc::clone(&*cell.borrow()))
        .ok()
        .or_else(ambient)
}

/// Apply `f` to the caller's store, creating the ambient store if needed.
///
/// Writes go through `Arc::make_mut`, so a store shared with a child scope is
/// copied before being changed.
fn update<R>(f: impl FnOnce(&mut ContextMap) -> R) -> R {
    if in_scope() {
        return SCOPED.with(|cell| {
            let mut store = cell.borrow_mut();
            f(Arc::make_mut(&mut *store))
        });
    }
    match tokio::task::try_id() {
        Some(id) => {
            let mut stores = task_stores();
            f(Arc::make_mut(stores.entry(id).or_default()))
        },
        None => THREAD_AMBIENT.with(|cell| {
            let mut slot = cell.borrow_mut();
            f(Arc::make_mut(slot.get_or_insert_with(Store::default)))
        }),
    }
}

fn collect<I, K, V>(pairs: I) -> ContextMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Value bound to `key` in the current context.
///
/// Returns `None` when no context is active or the key is unset.
#[must_use]
pub fn get(key: &str) -> Option<String> {
    current().and_then(|store| store.get(key).cloned())
}

/// Bind `key` to `value` in the current context.
///
/// Mutate-forward: the binding stays for the rest of the current context and
/// is not undone when the calling function returns. See the module docs for
/// the leak risk outside a scope.
pub fn put(key: impl Into<String>, value: impl Into<String>) {
    let (key, value) = (key.into(), value.into());
    update(|store| {
        store.insert(key, value);
    });
}

/// [`put`] every pair.
pub fn put_all<I, K, V>(pairs: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let pairs = collect(pairs);
    update(|store| store.extend(pairs));
}

/// Remove `key` from the current context, returning its previous value.
pub fn remove(key: &str) -> Option<String> {
    if current().is_none() {
        return None;
    }
    update(|store| store.remove(key))
}

/// Replace the current context with an empty store.
///
/// Mutate-forward like [`put`]. Contexts of enclosing scopes are untouched and
/// come back unchanged when the inner scope exits. Outside any scope this
/// releases the caller's ambient store.
pub fn clear() {
    if in_scope() {
        SCOPED.with(|cell| *cell.borrow_mut() = Store::default());
        return;
    }
    match tokio::task::try_id() {
        Some(id) => {
            task_stores().remove(&id);
        },
        None => THREAD_AMBIENT.with(|cell| *cell.borrow_mut() = None),
    }
}

/// Copy of every pair in the current context.
#[must_use]
pub fn snapshot() -> ContextMap {
    current().map(|store| (*store).clone()).unwrap_or_default()
}

/// Whether any context (scoped or ambient) is active for the caller.
#[must_use]
pub fn is_active() -> bool {
    current().is_some()
}

/// Run `future` with exactly `initial` as its context.
///
/// Changes made inside are visible only to the future and what it calls; the
/// caller's context is untouched afterwards.
pub async fn run_with_context<I, K, V, F>(initial: I, future: F) -> F::Output
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
    F: Future,
{
    let store = Arc::new(collect(initial));
    SCOPED.scope(RefCell::new(store), future).await
}

/// Synchronous form of [`run_with_context`].
pub fn run_with_context_sync<I, K, V, R>(initial: I, f: impl FnOnce() -> R) -> R
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let store = Arc::new(collect(initial));
    SCOPED.sync_scope(RefCell::new(store), f)
}

/// Run `future` in a nested scope that starts from the caller's context with
/// `extra` merged on top.
///
/// The nested scope shares the caller's store until its first write.
pub async fn run_with_inherited<I, K, V, F>(extra: I, future: F) -> F::Output
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
    F: Future,
{
    let extra = collect(extra);
    let mut store = current().unwrap_or_default();
    if !extra.is_empty() {
        Arc::make_mut(&mut store).extend(extra);
    }
    SCOPED.scope(RefCell::new(store), future).await
}

/// Bind a copy of the current context to `future`.
///
/// The returned future runs in its own scope wherever it is polled, which is
/// how context crosses into `tokio::spawn`. Writes made by the child stay in
/// the child.
pub fn in_current_context<F: Future>(future: F) -> impl Future<Output = F::Output> {
    let store = current().unwrap_or_default();
    SCOPED.scope(RefCell::new(store), future)
}

/// `tokio::spawn` that carries the current context into the new task.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(in_current_context(future))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn scoped_get_and_restore() {
        run_with_context_sync([("a", "outer")], || {
            assert_eq!(get("a").as_deref(), Some("outer"));

            run_with_context_sync([("a", "1")], || {
                assert_eq!(get("a").as_deref(), Some("1"));
                put("b", "2");
                assert_eq!(get("b").as_deref(), Some("2"));
            });

            assert_eq!(get("a").as_deref(), Some("outer"));
            assert_eq!(get("b"), None);
        });
    }

    #[test]
    fn put_accumulates() {
        run_with_context_sync(ContextMap::new(), || {
            put("x", "1");
            put("y", "2");
            assert_eq!(get("x").as_deref(), Some("1"));
            assert_eq!(get("y").as_deref(), Some("2"));
        });
    }

    #[test]
    fn clear_forgets_previous_puts() {
        run_with_context_sync(ContextMap::new(), || {
            put("x", "1");
            clear();
            assert_eq!(get("x"), None);
        });
    }

    #[test]
    fn clear_leaves_parent_scope_alone() {
        run_with_context_sync([("keep", "yes")], || {
            run_with_context_sync([("inner", "1")], clear);
            assert_eq!(get("keep").as_deref(), Some("yes"));
        });
    }

    #[test]
    fn ambient_put_outside_scope() {
        std::thread::spawn(|| {
            assert!(!is_active());
            assert_eq!(get("x"), None);

            put("x", "1");
            put_all([("y", "2"), ("z", "3")]);
            assert_eq!(get("x").as_deref(), Some("1"));
            assert_eq!(snapshot().len(), 3);

            // A scope hides the ambient store and restores it afterwards.
            run_with_context_sync([("x", "scoped")], || {
                assert_eq!(get("x").as_deref(), Some("scoped"));
                assert_eq!(get("y"), None);
            });
            assert_eq!(get("x").as_deref(), Some("1"));

            assert_eq!(remove("y").as_deref(), Some("2"));
            clear();
            assert_eq!(get("x"), None);
            assert!(snapshot().is_empty());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn remove_without_context_is_noop() {
        std::thread::spawn(|| {
            assert_eq!(remove("missing"), None);
            assert!(!is_active());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn restored_after_panic() {
        run_with_context_sync([("a", "outer")], || {
            let result = std::panic::catch_unwind(|| {
                run_with_context_sync([("a", "inner")], || panic!("boom"));
            });
            assert!(result.is_err());
            assert_eq!(get("a").as_deref(), Some("outer"));
        });
    }

    #[tokio::test]
    async fn unscoped_puts_stay_with_their_task() {
        let first = tokio::spawn(async {
            put("user", "alice");
            tokio::time::sleep(Duration::from_millis(20)).await;
            let seen = get("user");
            clear();
            seen
        });
        let second = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let before = get("user");
            put("user", "bob");
            tokio::time::sleep(Duration::from_millis(20)).await;
            let after = get("user");
            clear();
            (before, after)
        });

        assert_eq!(first.await.unwrap().as_deref(), Some("alice"));
        let (before, after) = second.await.unwrap();
        assert_eq!(before, None);
        assert_eq!(after.as_deref(), Some("bob"));
        assert_eq!(get("user"), None);
    }

    #[tokio::test]
    async fn clear_releases_task_store() {
        tokio::spawn(async {
            put("k", "v");
            let id = tokio::task::id();
            assert!(task_stores().contains_key(&id));

            clear();
            assert!(!task_stores().contains_key(&id));
            assert_eq!(get("k"), None);
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn async_scope_survives_await_points() {
        let seen = run_with_context([("request_id", "r-7")], async {
            tokio::task::yield_now().await;
            put("step", "after-yield");
            tokio::task::yield_now().await;
            (get("request_id"), get("step"))
        })
        .await;

        assert_eq!(seen.0.as_deref(), Some("r-7"));
        assert_eq!(seen.1.as_deref(), Some("after-yield"));
        assert_eq!(get("request_id"), None);
    }

    #[tokio::test]
    async fn inherited_scope_copies_on_write() {
        run_with_context([("a", "1")], async {
            run_with_inherited([("b", "2")], async {
                assert_eq!(get("a").as_deref(), Some("1"));
                assert_eq!(get("b").as_deref(), Some("2"));
                put("a", "changed");
            })
            .await;

            assert_eq!(get("a").as_deref(), Some("1"));
            assert_eq!(get("b"), None);
        })
        .await;
    }

    #[tokio::test]
    async fn spawn_carries_a_copy() {
        run_with_context([("trace", "t-1")], async {
            let handle = spawn(async {
                let inherited = get("trace");
                put("child", "yes");
                inherited
            });
            assert_eq!(handle.await.unwrap().as_deref(), Some("t-1"));
            assert_eq!(get("child"), None);
        })
        .await;
    }
}
