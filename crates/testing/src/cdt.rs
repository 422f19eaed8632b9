//! Server-side evaluation of list and map operations

use std::cmp::Ordering;

use aerie_core::operations::maps::{self, MapReturnType};
use aerie_core::operations::{lists, CdtOp};
use aerie_core::{Bins, MapOrder, MapValue, ResultCode, Value};

type Outcome = std::result::Result<Value, ResultCode>;

const ELEMENT_NOT_FOUND: i32 = 23;
const ELEMENT_EXISTS: i32 = 24;

/// Apply a collection operation to `bin`, returning its result value.
///
/// Reads leave `bins` untouched. A modify on a missing bin creates it.
pub fn apply(bins: &mut Bins, bin: &str, op: &CdtOp) -> Outcome {
    if op.code < maps::SET_TYPE {
        apply_list(bins, bin, op)
    } else {
        apply_map(bins, bin, op)
    }
}

fn arg(op: &CdtOp, i: usize) -> std::result::Result<&Value, ResultCode> {
    op.args.get(i).ok_or(ResultCode::RequestInvalid)
}

fn int_arg(op: &CdtOp, i: usize) -> std::result::Result<i64, ResultCode> {
    arg(op, i)?.as_int().ok_or(ResultCode::RequestInvalid)
}

fn opt_count(op: &CdtOp, i: usize) -> std::result::Result<Option<usize>, ResultCode> {
    match op.args.get(i) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int(c)) if *c >= 0 => Ok(Some(*c as usize)),
        Some(_) => Err(ResultCode::RequestInvalid),
    }
}

/// Resolve a possibly negative index against `len`.
fn resolve(index: i64, len: usize) -> Option<usize> {
    let i = if index < 0 { len as i64 + index } else { index };
    (i >= 0).then_some(i as usize)
}

/// Clamp `[index, index + count)` to `len`.
fn span(index: i64, count: Option<usize>, len: usize) -> (usize, usize) {
    let start = resolve(index, len).unwrap_or(0).min(len);
    let end = count.map_or(len, |c| start.saturating_add(c).min(len));
    (start, end)
}

// ---------------------------------------------------------------------------
// lists

fn list_read(bins: &Bins, bin: &str) -> std::result::Result<Option<Vec<Value>>, ResultCode> {
    match bins.get(bin) {
        None => Ok(None),
        Some(Value::List(items)) => Ok(Some(items.clone())),
        Some(_) => Err(ResultCode::BinIncompatibleType),
    }
}

fn apply_list(bins: &mut Bins, bin: &str, op: &CdtOp) -> Outcome {
    let existing = list_read(bins, bin)?;
    if matches!(op.code, lists::SIZE | lists::GET | lists::GET_RANGE) {
        return match existing {
            Some(items) => list_query(&items, op),
            None => Ok(Value::Null),
        };
    }
    let mut items = existing.unwrap_or_default();
    let out = list_modify(&mut items, op)?;
    bins.insert(bin.to_string(), Value::List(items));
    Ok(out)
}

fn list_query(items: &[Value], op: &CdtOp) -> Outcome {
    match op.code {
        lists::SIZE => Ok(Value::Int(items.len() as i64)),
        lists::GET => {
            let i = resolve(int_arg(op, 0)?, items.len())
                .filter(|i| *i < items.len())
                .ok_or(ResultCode::RequestInvalid)?;
            Ok(items[i].clone())
        }
        lists::GET_RANGE => {
            let (s, e) = span(int_arg(op, 0)?, opt_count(op, 1)?, items.len());
            Ok(Value::List(items[s..e].to_vec()))
        }
        _ => Err(ResultCode::RequestInvalid),
    }
}

fn list_modify(items: &mut Vec<Value>, op: &CdtOp) -> Outcome {
    let len = items.len();
    match op.code {
        lists::APPEND => {
            items.push(arg(op, 0)?.clone());
            Ok(Value::Int(items.len() as i64))
        }
        lists::APPEND_ITEMS => {
            let more = arg(op, 0)?.as_list().ok_or(ResultCode::RequestInvalid)?;
            items.extend(more.iter().cloned());
            Ok(Value::Int(items.len() as i64))
        }
        lists::INSERT | lists::INSERT_ITEMS => {
            let at = resolve(int_arg(op, 0)?, len)
                .filter(|i| *i <= len)
                .ok_or(ResultCode::RequestInvalid)?;
            let value = arg(op, 1)?;
            if op.code == lists::INSERT {
                items.insert(at, value.clone());
            } else {
                let more = value.as_list().ok_or(ResultCode::RequestInvalid)?;
                items.splice(at..at, more.iter().cloned());
            }
            Ok(Value::Int(items.len() as i64))
        }
        lists::POP | lists::REMOVE => {
            let at = resolve(int_arg(op, 0)?, len)
                .filter(|i| *i < len)
                .ok_or(ResultCode::RequestInvalid)?;
            let removed = items.remove(at);
            Ok(if op.code == lists::POP {
                removed
            } else {
                Value::Int(1)
            })
        }
        lists::POP_RANGE | lists::REMOVE_RANGE => {
            let (s, e) = span(int_arg(op, 0)?, opt_count(op, 1)?, len);
            let removed: Vec<Value> = items.drain(s..e).collect();
            Ok(if op.code == lists::POP_RANGE {
                Value::List(removed)
            } else {
                Value::Int(removed.len() as i64)
            })
        }
        lists::SET => {
            let at = resolve(int_arg(op, 0)?, len).ok_or(ResultCode::RequestInvalid)?;
            let value = arg(op, 1)?.clone();
            match at.cmp(&len) {
                Ordering::Less => items[at] = value,
                Ordering::Equal => items.push(value),
                Ordering::Greater => return Err(ResultCode::RequestInvalid),
            }
            Ok(Value::Null)
        }
        lists::TRIM => {
            let (s, e) = span(int_arg(op, 0)?, opt_count(op, 1)?, len);
            let kept: Vec<Value> = items[s..e].to_vec();
            let removed = len - kept.len();
            *items = kept;
            Ok(Value::Int(removed as i64))
        }
        lists::CLEAR => {
            items.clear();
            Ok(Value::Null)
        }
        _ => Err(ResultCode::RequestInvalid),
    }
}

// ---------------------------------------------------------------------------
// maps

fn order_arg(op: &CdtOp, i: usize) -> MapOrder {
    op.args
        .get(i)
        .and_then(Value::as_int)
        .and_then(|f| MapOrder::from_flag(f as u8))
        .unwrap_or_default()
}

fn map_read(bins: &Bins, bin: &str) -> std::result::Result<Option<MapValue>, ResultCode> {
    match bins.get(bin) {
        None => Ok(None),
        Some(Value::Map(m)) => Ok(Some(m.clone())),
        Some(_) => Err(ResultCode::BinIncompatibleType),
    }
}

fn is_map_read(code: u8) -> bool {
    code >= maps::SIZE
}

fn creation_order(op: &CdtOp) -> MapOrder {
    match op.code {
        maps::SET_TYPE => order_arg(op, 0),
        maps::PUT | maps::ADD | maps::REPLACE | maps::INCREMENT | maps::DECREMENT => {
            order_arg(op, 2)
        }
        maps::PUT_ITEMS | maps::ADD_ITEMS | maps::REPLACE_ITEMS => order_arg(op, 1),
        _ => MapOrder::Unordered,
    }
}

fn apply_map(bins: &mut Bins, bin: &str, op: &CdtOp) -> Outcome {
    let existing = map_read(bins, bin)?;
    let creates = matches!(op.code, maps::SET_TYPE..=maps::DECREMENT);
    if is_map_read(op.code) || (existing.is_none() && !creates) {
        return match existing {
            Some(m) => map_query(&m, op),
            None => Ok(Value::Null),
        };
    }
    let mut map = existing.unwrap_or_else(|| MapValue::with_order(creation_order(op)));
    let out = map_modify(&mut map, op)?;
    bins.insert(bin.to_string(), Value::Map(map));
    Ok(out)
}

fn write_entry(map: &mut MapValue, code: u8, key: Value, value: Value) -> std::result::Result<(), ResultCode> {
    let exists = map.get(&key).is_some();
    match code {
        maps::ADD | maps::ADD_ITEMS if exists => {
            return Err(ResultCode::from_code(ELEMENT_EXISTS));
        }
        maps::REPLACE | maps::REPLACE_ITEMS if !exists => {
            return Err(ResultCode::from_code(ELEMENT_NOT_FOUND));
        }
        _ => {}
    }
    map.insert(key, value);
    Ok(())
}

fn add_numbers(a: &Value, b: &Value) -> Outcome {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_add(*y))),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x + y)),
        _ => Err(ResultCode::BinIncompatibleType),
    }
}

fn negate(v: &Value) -> Outcome {
    match v {
        Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        _ => Err(ResultCode::RequestInvalid),
    }
}

fn map_modify(map: &mut MapValue, op: &CdtOp) -> Outcome {
    match op.code {
        maps::SET_TYPE => {
            map.order = order_arg(op, 0);
            if map.order != MapOrder::Unordered {
                map.sort_by_key();
            }
            Ok(Value::Null)
        }
        maps::PUT | maps::ADD | maps::REPLACE => {
            write_entry(map, op.code, arg(op, 0)?.clone(), arg(op, 1)?.clone())?;
            Ok(Value::Int(map.len() as i64))
        }
        maps::PUT_ITEMS | maps::ADD_ITEMS | maps::REPLACE_ITEMS => {
            let items = arg(op, 0)?.as_map().ok_or(ResultCode::RequestInvalid)?;
            for (k, v) in items.entries.iter() {
                write_entry(map, op.code, k.clone(), v.clone())?;
            }
            Ok(Value::Int(map.len() as i64))
        }
        maps::INCREMENT | maps::DECREMENT => {
            let key = arg(op, 0)?.clone();
            let mut delta = arg(op, 1)?.clone();
            if op.code == maps::DECREMENT {
                delta = negate(&delta)?;
            }
            let next = match map.get(&key) {
                Some(cur) => add_numbers(cur, &delta)?,
                None => delta,
            };
            map.insert(key, next.clone());
            Ok(next)
        }
        maps::CLEAR => {
            map.entries.clear();
            Ok(Value::Null)
        }
        code if (maps::REMOVE_BY_KEY..=maps::REMOVE_BY_RANK_RANGE).contains(&code) => {
            let (selected, single) = select(map, code, op)?;
            let rt = return_type(op)?;
            let view = sorted_entries(map);
            let out = render(&view, &selected, single, rt);
            for i in &selected {
                map.remove(&view[*i].0);
            }
            Ok(out)
        }
        _ => Err(ResultCode::RequestInvalid),
    }
}

fn map_query(map: &MapValue, op: &CdtOp) -> Outcome {
    if op.code == maps::SIZE {
        return Ok(Value::Int(map.len() as i64));
    }
    let (selected, single) = select(map, op.code, op)?;
    let rt = return_type(op)?;
    Ok(render(&sorted_entries(map), &selected, single, rt))
}

fn return_type(op: &CdtOp) -> std::result::Result<MapReturnType, ResultCode> {
    MapReturnType::from_i64(int_arg(op, 0)?).ok_or(ResultCode::RequestInvalid)
}

/// Entries in key order: the index space of selectors.
fn sorted_entries(map: &MapValue) -> Vec<(Value, Value)> {
    let mut entries = map.entries.clone();
    entries.sort_by(|(a, _), (b, _)| a.cmp_scalar(b));
    entries
}

/// Key-order positions listed in value order.
fn rank_order(view: &[(Value, Value)]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..view.len()).collect();
    order.sort_by(|a, b| view[*a].1.cmp_scalar(&view[*b].1));
    order
}

fn in_interval(v: &Value, begin: &Value, end: &Value) -> bool {
    let above = begin.is_null() || v.cmp_scalar(begin) != Ordering::Less;
    let below = end.is_null() || v.cmp_scalar(end) == Ordering::Less;
    above && below
}

/// Selected key-order positions, and whether the selector names one entry.
///
/// Accepts both the get and the remove code of each selector.
fn select(
    map: &MapValue,
    code: u8,
    op: &CdtOp,
) -> std::result::Result<(Vec<usize>, bool), ResultCode> {
    let view = sorted_entries(map);
    let len = view.len();
    let by_key = |pred: &dyn Fn(&Value) -> bool| -> Vec<usize> {
        (0..len).filter(|i| pred(&view[*i].0)).collect()
    };
    let by_value = |pred: &dyn Fn(&Value) -> bool| -> Vec<usize> {
        (0..len).filter(|i| pred(&view[*i].1)).collect()
    };
    Ok(match code {
        maps::GET_BY_KEY | maps::REMOVE_BY_KEY => {
            let k = arg(op, 1)?;
            (by_key(&|v| v == k), true)
        }
        maps::REMOVE_BY_KEY_LIST => {
            let keys = arg(op, 1)?.as_list().ok_or(ResultCode::RequestInvalid)?;
            (by_key(&|v| keys.contains(v)), false)
        }
        maps::GET_BY_KEY_INTERVAL | maps::REMOVE_BY_KEY_INTERVAL => {
            let (b, e) = (arg(op, 1)?, arg(op, 2)?);
            (by_key(&|v| in_interval(v, b, e)), false)
        }
        maps::GET_BY_VALUE | maps::REMOVE_BY_VALUE => {
            let target = arg(op, 1)?;
            (by_value(&|v| v == target), false)
        }
        maps::REMOVE_BY_VALUE_LIST => {
            let values = arg(op, 1)?.as_list().ok_or(ResultCode::RequestInvalid)?;
            (by_value(&|v| values.contains(v)), false)
        }
        maps::GET_BY_VALUE_INTERVAL | maps::REMOVE_BY_VALUE_INTERVAL => {
            let (b, e) = (arg(op, 1)?, arg(op, 2)?);
            (by_value(&|v| in_interval(v, b, e)), false)
        }
        maps::GET_BY_INDEX | maps::REMOVE_BY_INDEX => {
            let i = resolve(int_arg(op, 1)?, len).filter(|i| *i < len);
            (i.into_iter().collect(), true)
        }
        maps::GET_BY_INDEX_RANGE | maps::REMOVE_BY_INDEX_RANGE => {
            let (s, e) = span(int_arg(op, 1)?, opt_count(op, 2)?, len);
            ((s..e).collect(), false)
        }
        maps::GET_BY_RANK | maps::REMOVE_BY_RANK => {
            let order = rank_order(&view);
            let r = resolve(int_arg(op, 1)?, len).filter(|r| *r < len);
            (r.map(|r| order[r]).into_iter().collect(), true)
        }
        maps::GET_BY_RANK_RANGE | maps::REMOVE_BY_RANK_RANGE => {
            let order = rank_order(&view);
            let (s, e) = span(int_arg(op, 1)?, opt_count(op, 2)?, len);
            let mut picked: Vec<usize> = order[s..e].to_vec();
            picked.sort_unstable();
            (picked, false)
        }
        _ => return Err(ResultCode::RequestInvalid),
    })
}

fn render(view: &[(Value, Value)], selected: &[usize], single: bool, rt: MapReturnType) -> Value {
    let len = view.len();
    let ranks = || {
        let order = rank_order(view);
        let mut rank_of = vec![0usize; len];
        for (rank, pos) in order.into_iter().enumerate() {
            rank_of[pos] = rank;
        }
        rank_of
    };
    let list_or_one = |items: Vec<Value>| -> Value {
        if single {
            items.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::List(items)
        }
    };
    match rt {
        MapReturnType::None => Value::Null,
        MapReturnType::Count => Value::Int(selected.len() as i64),
        MapReturnType::Index => list_or_one(selected.iter().map(|i| Value::Int(*i as i64)).collect()),
        MapReturnType::ReverseIndex => {
            list_or_one(selected.iter().map(|i| Value::Int((len - 1 - i) as i64)).collect())
        }
        MapReturnType::Rank => {
            let r = ranks();
            list_or_one(selected.iter().map(|i| Value::Int(r[*i] as i64)).collect())
        }
        MapReturnType::ReverseRank => {
            let r = ranks();
            list_or_one(selected.iter().map(|i| Value::Int((len - 1 - r[*i]) as i64)).collect())
        }
        MapReturnType::Key => list_or_one(selected.iter().map(|i| view[*i].0.clone()).collect()),
        MapReturnType::Value => list_or_one(selected.iter().map(|i| view[*i].1.clone()).collect()),
        MapReturnType::KeyValue => {
            let mut out = MapValue::with_order(MapOrder::KeyOrdered);
            out.entries = selected.iter().map(|i| view[*i].clone()).collect();
            Value::Map(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerie_core::operations::maps::MapPolicy;
    use aerie_core::operations::OpValue;
    use aerie_core::{bins, Operation};

    fn run(bins: &mut Bins, op: Operation) -> Outcome {
        let OpValue::Cdt(cdt) = &op.value else {
            panic!("not a collection operation");
        };
        apply(bins, &op.bin, cdt)
    }

    fn ints(v: &[i64]) -> Value {
        Value::List(v.iter().map(|i| Value::Int(*i)).collect())
    }

    #[test]
    fn test_list_append_creates_bin() {
        let mut b = Bins::new();
        assert_eq!(run(&mut b, lists::append("l", 1)).unwrap(), Value::Int(1));
        assert_eq!(run(&mut b, lists::append_items("l", vec![2.into(), 3.into()])).unwrap(), Value::Int(3));
        assert_eq!(b["l"], ints(&[1, 2, 3]));
    }

    #[test]
    fn test_list_negative_index() {
        let mut b = bins! { "l" => ints(&[1, 2, 3]) };
        assert_eq!(run(&mut b, lists::get("l", -1)).unwrap(), Value::Int(3));
        assert_eq!(run(&mut b, lists::pop("l", -1)).unwrap(), Value::Int(3));
        assert_eq!(run(&mut b, lists::size("l")).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_list_ranges() {
        let mut b = bins! { "l" => ints(&[1, 2, 3, 4, 5]) };
        assert_eq!(run(&mut b, lists::get_range("l", 1, Some(2))).unwrap(), ints(&[2, 3]));
        assert_eq!(run(&mut b, lists::get_range("l", 3, None)).unwrap(), ints(&[4, 5]));
        assert_eq!(run(&mut b, lists::trim("l", 1, 3)).unwrap(), Value::Int(2));
        assert_eq!(b["l"], ints(&[2, 3, 4]));
        assert_eq!(run(&mut b, lists::remove_range("l", 0, Some(2))).unwrap(), Value::Int(2));
        assert_eq!(b["l"], ints(&[4]));
    }

    #[test]
    fn test_list_out_of_range() {
        let mut b = bins! { "l" => ints(&[1]) };
        assert_eq!(run(&mut b, lists::get("l", 5)), Err(ResultCode::RequestInvalid));
        assert_eq!(run(&mut b, lists::set("l", 3, 0)), Err(ResultCode::RequestInvalid));
    }

    #[test]
    fn test_list_op_on_scalar_bin() {
        let mut b = bins! { "l" => 1 };
        assert_eq!(run(&mut b, lists::append("l", 1)), Err(ResultCode::BinIncompatibleType));
    }

    #[test]
    fn test_read_of_missing_bin_is_null() {
        let mut b = Bins::new();
        assert_eq!(run(&mut b, lists::size("l")).unwrap(), Value::Null);
        assert_eq!(run(&mut b, maps::size("m")).unwrap(), Value::Null);
        assert!(b.is_empty());
    }

    #[test]
    fn test_map_put_and_get() {
        let mut b = Bins::new();
        let p = MapPolicy::default();
        assert_eq!(run(&mut b, maps::put("m", "b", 2, p)).unwrap(), Value::Int(1));
        assert_eq!(run(&mut b, maps::put("m", "a", 1, p)).unwrap(), Value::Int(2));
        assert_eq!(
            run(&mut b, maps::get_by_key("m", "a", MapReturnType::Value)).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            run(&mut b, maps::get_by_index("m", 0, MapReturnType::Key)).unwrap(),
            Value::from("a")
        );
    }

    #[test]
    fn test_map_create_only_and_update_only() {
        use aerie_core::operations::maps::MapWriteMode;
        let mut b = Bins::new();
        let create = MapPolicy { write_mode: MapWriteMode::CreateOnly, ..Default::default() };
        let update = MapPolicy { write_mode: MapWriteMode::UpdateOnly, ..Default::default() };
        run(&mut b, maps::put("m", "a", 1, create)).unwrap();
        assert_eq!(
            run(&mut b, maps::put("m", "a", 2, create)),
            Err(ResultCode::from_code(ELEMENT_EXISTS))
        );
        assert_eq!(
            run(&mut b, maps::put("m", "z", 2, update)),
            Err(ResultCode::from_code(ELEMENT_NOT_FOUND))
        );
    }

    #[test]
    fn test_map_increment() {
        let mut b = Bins::new();
        let p = MapPolicy::default();
        assert_eq!(run(&mut b, maps::increment("m", "n", 5, p)).unwrap(), Value::Int(5));
        assert_eq!(run(&mut b, maps::decrement("m", "n", 2, p)).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_map_rank_and_remove() {
        let mut m = MapValue::new();
        m.insert("a".into(), Value::Int(30));
        m.insert("b".into(), Value::Int(10));
        m.insert("c".into(), Value::Int(20));
        let mut b = bins! { "m" => m };
        assert_eq!(
            run(&mut b, maps::get_by_rank("m", 0, MapReturnType::Key)).unwrap(),
            Value::from("b")
        );
        assert_eq!(
            run(&mut b, maps::get_by_rank_range("m", 0, Some(2), MapReturnType::Key)).unwrap(),
            Value::List(vec!["b".into(), "c".into()])
        );
        assert_eq!(
            run(&mut b, maps::remove_by_value_range("m", 15, 100, MapReturnType::Count)).unwrap(),
            Value::Int(2)
        );
        assert_eq!(run(&mut b, maps::size("m")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_map_key_interval_open_end() {
        let mut m = MapValue::new();
        for k in ["a", "b", "c"] {
            m.insert(k.into(), Value::Int(1));
        }
        let mut b = bins! { "m" => m };
        let out = run(
            &mut b,
            maps::get_by_key_range("m", "b", Value::Null, MapReturnType::Key),
        )
        .unwrap();
        assert_eq!(out, Value::List(vec!["b".into(), "c".into()]));
    }
}
