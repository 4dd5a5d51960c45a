//! Field arrays: structural row operations that keep values, row ids,
//! errors and dirty/touched marks index-aligned.
//!
//! Every operation is first turned into a [`RowPlan`]: for each position
//! of the new array, the old row it comes from (or `None` for a fresh row).
//! The same plan is then applied to every index-aligned structure.

use crate::access::{clear_mark, get_at_path, set_at_path, unset_at_path, unset_empty_array};
use crate::form::{Form, FormCore};
use crate::{FormError, FormResult, Path, Subscription, ValidationRules};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Generate a fresh row id.
pub fn new_row_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// A row of a field array with its stable id.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArrayRow {
    /// Stable id; moves with the row.
    pub id: String,
    /// Row value.
    pub value: Value,
}

/// Payload of the field-array channel.
#[derive(Clone, Debug)]
pub struct ArrayEvent {
    /// Array path.
    pub name: Path,
    /// Rows after the operation.
    pub rows: Vec<ArrayRow>,
}

/// A structural operation on a field array.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayOp {
    /// Add rows at the end.
    Append(Vec<Value>),
    /// Add rows at the start.
    Prepend(Vec<Value>),
    /// Add rows before `index` (`index == len` appends).
    Insert(usize, Vec<Value>),
    /// Remove the rows at these indices.
    Remove(Vec<usize>),
    /// Remove every row.
    RemoveAll,
    /// Exchange two rows.
    Swap(usize, usize),
    /// Move a row from one index to another, shifting the rows between.
    Move(usize, usize),
    /// Replace the value of one row; its id and marks stay.
    Update(usize, Value),
    /// Replace every row with fresh ones.
    Replace(Vec<Value>),
}

/// New-position -> old-index mapping plus the resulting values.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RowPlan {
    pub sources: Vec<Option<usize>>,
    pub values: Vec<Value>,
}

impl RowPlan {
    /// Old index -> new index.
    fn inverse(&self, old_len: usize) -> Vec<Option<usize>> {
        let mut inverse = vec![None; old_len];
        for (new, source) in self.sources.iter().enumerate() {
            if let Some(old) = source {
                inverse[*old] = Some(new);
            }
        }
        inverse
    }
}

fn check(name: &Path, index: usize, len: usize) -> FormResult<()> {
    if index < len {
        Ok(())
    } else {
        Err(FormError::index_out_of_bounds(name.clone(), index, len))
    }
}

fn kept(range: std::ops::Range<usize>) -> impl Iterator<Item = Option<usize>> {
    range.map(Some)
}

/// Plan `op` against the current rows.
pub(crate) fn plan(name: &Path, op: ArrayOp, old: &[Value]) -> FormResult<RowPlan> {
    let len = old.len();
    let plan = match op {
        ArrayOp::Append(rows) => RowPlan {
            sources: kept(0..len).chain(rows.iter().map(|_| None)).collect(),
            values: old.iter().cloned().chain(rows).collect(),
        },
        ArrayOp::Prepend(rows) => RowPlan {
            sources: rows.iter().map(|_| None).chain(kept(0..len)).collect(),
            values: rows.into_iter().chain(old.iter().cloned()).collect(),
        },
        ArrayOp::Insert(index, rows) => {
            if index > len {
                return Err(FormError::index_out_of_bounds(name.clone(), index, len));
            }
            RowPlan {
                sources: kept(0..index)
                    .chain(rows.iter().map(|_| None))
                    .chain(kept(index..len))
                    .collect(),
                values: old[..index]
                    .iter()
                    .cloned()
                    .chain(rows)
                    .chain(old[index..].iter().cloned())
                    .collect(),
            }
        }
        ArrayOp::Remove(mut indices) => {
            indices.sort_unstable();
            indices.dedup();
            if let Some(&last) = indices.last() {
                check(name, last, len)?;
            }
            let sources: Vec<Option<usize>> = (0..len)
                .filter(|i| indices.binary_search(i).is_err())
                .map(Some)
                .collect();
            let values = sources.iter().flatten().map(|&i| old[i].clone()).collect();
            RowPlan { sources, values }
        }
        ArrayOp::RemoveAll => RowPlan {
            sources: Vec::new(),
            values: Vec::new(),
        },
        ArrayOp::Swap(a, b) => {
            check(name, a, len)?;
            check(name, b, len)?;
            let mut sources: Vec<Option<usize>> = kept(0..len).collect();
            sources.swap(a, b);
            let mut values = old.to_vec();
            values.swap(a, b);
            RowPlan { sources, values }
        }
        ArrayOp::Move(from, to) => {
            check(name, from, len)?;
            check(name, to, len)?;
            let mut sources: Vec<Option<usize>> = kept(0..len).collect();
            let source = sources.remove(from);
            sources.insert(to, source);
            let mut values = old.to_vec();
            let row = values.remove(from);
            values.insert(to, row);
            RowPlan { sources, values }
        }
        ArrayOp::Update(index, row) => {
            check(name, index, len)?;
            let mut values = old.to_vec();
            values[index] = row;
            RowPlan {
                sources: kept(0..len).collect(),
                values,
            }
        }
        ArrayOp::Replace(rows) => RowPlan {
            sources: rows.iter().map(|_| None).collect(),
            values: rows,
        },
    };
    Ok(plan)
}

/// Row ids of every registered field array.
#[derive(Debug, Default)]
pub(crate) struct RowIds {
    ids: HashMap<Path, Vec<String>>,
}

impl RowIds {
    /// Ids of `name`, resized to `len` (fresh ids for new tail rows).
    pub fn sync(&mut self, name: &Path, len: usize) -> &mut Vec<String> {
        let ids = self.ids.entry(name.clone()).or_default();
        ids.truncate(len);
        while ids.len() < len {
            ids.push(new_row_id());
        }
        ids
    }

    /// Replace the ids of `name` with `len` fresh ones.
    pub fn regenerate(&mut self, name: &Path, len: usize) {
        self.ids
            .insert(name.clone(), (0..len).map(|_| new_row_id()).collect());
    }

    /// Regenerate ids of every array at or below `written`.
    pub fn on_write(&mut self, written: &Path, values: &Value) {
        let affected: Vec<Path> = self
            .ids
            .keys()
            .filter(|name| written.is_prefix_of(name))
            .cloned()
            .collect();
        for name in affected {
            let len = row_count(values, &name);
            self.regenerate(&name, len);
        }
    }

    /// Regenerate every array's ids.
    pub fn regenerate_all(&mut self, values: &Value) {
        self.on_write(&Path::root(), values);
    }

    pub fn remove(&mut self, name: &Path) {
        self.ids.retain(|k, _| !name.is_prefix_of(k));
    }

    /// Rows of `name` paired with their ids.
    pub fn rows(&mut self, name: &Path, values: &Value) -> Vec<ArrayRow> {
        let rows = match get_at_path(values, name) {
            Some(Value::Array(rows)) => rows.clone(),
            _ => Vec::new(),
        };
        let ids = self.sync(name, rows.len());
        ids.iter()
            .cloned()
            .zip(rows)
            .map(|(id, value)| ArrayRow { id, value })
            .collect()
    }
}

fn row_count(values: &Value, name: &Path) -> usize {
    get_at_path(values, name)
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// Re-index the array of marks at `name` by `plan`; fresh rows get `null`.
fn remap_marks(tree: &mut Value, name: &Path, plan: &RowPlan) {
    let Some(Value::Array(marks)) = get_at_path(tree, name) else {
        return;
    };
    let mut remapped: Vec<Value> = plan
        .sources
        .iter()
        .map(|source| {
            source
                .and_then(|old| marks.get(old).cloned())
                .unwrap_or(Value::Null)
        })
        .collect();
    while matches!(remapped.last(), Some(Value::Null)) {
        remapped.pop();
    }
    set_at_path(tree, name, Value::Array(remapped));
    unset_empty_array(tree, name);
}

/// Outcome of a structural operation.
#[derive(Clone, Debug)]
pub(crate) struct ArrayChange {
    /// Surviving rows whose content changed.
    pub changed_rows: Vec<usize>,
    pub rows: Vec<ArrayRow>,
}

/// Apply `op` to the array at `name` in one step.
pub(crate) fn apply(core: &mut FormCore, name: &Path, op: ArrayOp) -> FormResult<ArrayChange> {
    if core.scheduler.is_closed() {
        return Err(FormError::Closed);
    }
    if !core.registry.contains(name) {
        return Err(FormError::unknown_field(name.clone()));
    }
    if !core.registry.is_array(name) {
        return Err(FormError::NotAFieldArray { name: name.clone() });
    }
    let old: Vec<Value> = core
        .registry
        .live_at(name)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let remove_all = op == ArrayOp::RemoveAll;
    let updated = match &op {
        ArrayOp::Update(index, _) => Some(*index),
        _ => None,
    };
    let plan = plan(name, op, &old)?;

    let old_ids = core.rows.sync(name, old.len()).clone();
    let new_ids: Vec<String> = plan
        .sources
        .iter()
        .map(|source| source.map_or_else(new_row_id, |old| old_ids[old].clone()))
        .collect();
    core.rows.ids.insert(name.clone(), new_ids.clone());

    core.registry.set_value(name, Value::Array(plan.values.clone()));

    let inverse = plan.inverse(old.len());
    core.errors
        .remap_rows(name, |old| inverse.get(old).copied().flatten());

    if remove_all {
        clear_mark(&mut core.meta.dirty, name);
        unset_at_path(&mut core.meta.touched, name);
        set_at_path(&mut core.meta.touched, name, Value::Array(Vec::new()));
        clear_mark(&mut core.meta.validating, name);
    } else {
        remap_marks(&mut core.meta.dirty, name, &plan);
        remap_marks(&mut core.meta.touched, name, &plan);
        remap_marks(&mut core.meta.validating, name, &plan);
        if let Some(index) = updated {
            core.meta.update_dirty(&name.clone().index(index), &core.registry);
        }
    }

    core.registry.prune_rows(name, plan.values.len());
    core.meta.note_value_change();

    let changed_rows = plan
        .values
        .iter()
        .enumerate()
        .filter(|(i, row)| old.get(*i) != Some(*row))
        .map(|(i, _)| i)
        .collect();
    let rows = new_ids
        .into_iter()
        .zip(plan.values)
        .map(|(id, value)| ArrayRow { id, value })
        .collect();
    Ok(ArrayChange { changed_rows, rows })
}

/// Handle to one field array of a form.
#[derive(Clone)]
pub struct FieldArray {
    form: Form,
    name: Path,
}

impl std::fmt::Debug for FieldArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldArray")
            .field("name", &self.name.to_string())
            .finish()
    }
}

impl FieldArray {
    pub(crate) fn new(form: Form, name: Path) -> Self {
        Self { form, name }
    }

    /// Array path.
    pub fn name(&self) -> &Path {
        &self.name
    }

    /// Current rows with their ids.
    pub fn fields(&self) -> Vec<ArrayRow> {
        self.form.array_rows(&self.name)
    }

    /// Replace the array-level rules.
    pub fn set_rules(&self, rules: ValidationRules) {
        self.form.register_array(&self.name, rules);
    }

    /// Apply a structural operation.
    pub fn apply(&self, op: ArrayOp) -> FormResult<()> {
        self.form.apply_array_op(&self.name, op)
    }

    pub fn append(&self, row: Value) -> FormResult<()> {
        self.apply(ArrayOp::Append(vec![row]))
    }

    pub fn prepend(&self, row: Value) -> FormResult<()> {
        self.apply(ArrayOp::Prepend(vec![row]))
    }

    pub fn insert(&self, index: usize, row: Value) -> FormResult<()> {
        self.apply(ArrayOp::Insert(index, vec![row]))
    }

    pub fn remove(&self, index: usize) -> FormResult<()> {
        self.apply(ArrayOp::Remove(vec![index]))
    }

    pub fn remove_many(&self, indices: Vec<usize>) -> FormResult<()> {
        self.apply(ArrayOp::Remove(indices))
    }

    /// Remove every row. Clears the dirty marks of the array but leaves an
    /// empty touched array behind.
    pub fn remove_all(&self) -> FormResult<()> {
        self.apply(ArrayOp::RemoveAll)
    }

    pub fn swap(&self, a: usize, b: usize) -> FormResult<()> {
        self.apply(ArrayOp::Swap(a, b))
    }

    pub fn move_row(&self, from: usize, to: usize) -> FormResult<()> {
        self.apply(ArrayOp::Move(from, to))
    }

    pub fn update(&self, index: usize, row: Value) -> FormResult<()> {
        self.apply(ArrayOp::Update(index, row))
    }

    pub fn replace(&self, rows: Vec<Value>) -> FormResult<()> {
        self.apply(ArrayOp::Replace(rows))
    }

    /// Observe the rows after every structural operation on this array.
    pub fn subscribe(&self, callback: impl Fn(&[ArrayRow]) + Send + Sync + 'static) -> Subscription {
        let name = self.name.clone();
        self.form.array_channel().subscribe(move |event: &ArrayEvent| {
            if event.name == name {
                callback(&event.rows);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_path;
    use serde_json::json;

    fn rows(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({ "n": i })).collect()
    }

    fn items() -> Path {
        parse_path("items")
    }

    #[test]
    fn test_plan_insert_and_prepend() {
        let p = plan(&items(), ArrayOp::Insert(1, vec![json!("x")]), &rows(2)).unwrap();
        assert_eq!(p.sources, vec![Some(0), None, Some(1)]);
        assert_eq!(p.values[1], json!("x"));

        let p = plan(&items(), ArrayOp::Prepend(vec![json!("a"), json!("b")]), &rows(1)).unwrap();
        assert_eq!(p.sources, vec![None, None, Some(0)]);
    }

    #[test]
    fn test_plan_remove_many_unsorted() {
        let p = plan(&items(), ArrayOp::Remove(vec![3, 0, 3]), &rows(4)).unwrap();
        assert_eq!(p.sources, vec![Some(1), Some(2)]);
        assert_eq!(p.values, vec![json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(p.inverse(4), vec![None, Some(0), Some(1), None]);
    }

    #[test]
    fn test_plan_move_shifts_between() {
        let p = plan(&items(), ArrayOp::Move(0, 2), &rows(3)).unwrap();
        assert_eq!(p.sources, vec![Some(1), Some(2), Some(0)]);
        assert_eq!(p.values[2], json!({"n": 0}));
    }

    #[test]
    fn test_plan_rejects_out_of_bounds() {
        let err = plan(&items(), ArrayOp::Swap(0, 5), &rows(2)).unwrap_err();
        assert!(matches!(err, FormError::IndexOutOfBounds { index: 5, len: 2, .. }));
        assert!(plan(&items(), ArrayOp::Insert(3, vec![]), &rows(2)).is_err());
        assert!(plan(&items(), ArrayOp::Insert(2, vec![json!(1)]), &rows(2)).is_ok());
    }

    #[test]
    fn test_remap_marks_placeholder_for_new_rows() {
        let mut tree = json!({"items": [true, null, {"name": true}]});
        let p = plan(&items(), ArrayOp::Prepend(vec![json!({})]), &rows(3)).unwrap();
        remap_marks(&mut tree, &items(), &p);
        assert_eq!(tree, json!({"items": [null, true, null, {"name": true}]}));

        let p = plan(&items(), ArrayOp::Remove(vec![1, 3]), &rows(4)).unwrap();
        remap_marks(&mut tree, &items(), &p);
        assert_eq!(tree, json!({}));
    }

    #[test]
    fn test_row_ids_sync_and_regenerate() {
        let mut ids = RowIds::default();
        let values = json!({"items": [1, 2]});
        let first = ids.rows(&items(), &values);
        assert_eq!(first.len(), 2);
        assert_ne!(first[0].id, first[1].id);
        assert_eq!(ids.rows(&items(), &values), first);

        ids.on_write(&parse_path("other"), &values);
        assert_eq!(ids.rows(&items(), &values), first);
        ids.on_write(&items(), &values);
        assert_ne!(ids.rows(&items(), &values)[0].id, first[0].id);
    }
}
