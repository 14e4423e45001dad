#![no_main]

use frankenengine_composite::{
    CompositeBuilder, CompositeOptions, NativeFunction, PropertyDescriptor, Reflect, Target,
    TrapTable, Value,
};
use libfuzzer_sys::fuzz_target;

const MAX_STEPS: usize = 128;
const KEY_SPACE: u8 = 6;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    run_composite_program(data);
});

fn run_composite_program(data: &[u8]) {
    let options = CompositeOptions {
        is_callable: byte(data, 0) % 2 == 0,
        is_not_extensible: byte(data, 1) % 5 == 0,
        ..CompositeOptions::default()
    };
    let Ok((composite, modifier)) = CompositeBuilder::new(options)
        .initial_target(Target::from_entries([(key(data, 2), i64::from(byte(data, 3)))]))
        .build()
    else {
        return;
    };

    let mut targets: Vec<Target> = Vec::new();
    let mut tables: Vec<TrapTable> = Vec::new();
    let mut cursor = 4usize;
    for _ in 0..MAX_STEPS {
        let opcode = byte(data, cursor);
        let name = key(data, cursor.saturating_add(1));
        let value = i64::from(byte(data, cursor.saturating_add(2)));
        cursor = cursor.saturating_add(3);

        match opcode % 12 {
            0 => {
                let target = Target::from_entries([(name, value)]);
                targets.push(target.clone());
                modifier.add_override_target(target);
            }
            1 => {
                let target = Target::from_entries([(name, value)]);
                targets.push(target.clone());
                modifier.add_fallback_target(target);
            }
            2 => {
                if let Some(target) = pick(&targets, value) {
                    let _ = modifier.remove_target(&target);
                }
            }
            3 => {
                let written = composite.set(name.as_str(), value);
                if written {
                    assert_eq!(composite.get(name.as_str()), Value::Int(value));
                }
            }
            4 => {
                let deleted = composite.delete_property(name.as_str());
                if deleted {
                    assert!(!composite.has(name.as_str()));
                }
            }
            5 => {
                let _ = composite
                    .define_property(name.as_str(), PropertyDescriptor::data_frozen(value));
            }
            6 => {
                assert!(composite.prevent_extensions());
                assert!(!composite.is_extensible());
                assert!(!composite.set(name.as_str(), value));
            }
            7 => {
                let table = TrapTable::new().on_get(|c, k| Reflect::get(c, k));
                tables.push(table.clone());
                if value % 2 == 0 {
                    modifier.add_proxy_handler_override(table);
                } else {
                    modifier.add_proxy_handler_fallback(table);
                }
            }
            8 => {
                if let Some(table) = pick(&tables, value) {
                    if modifier.remove_proxy_override(&table) {
                        tables.retain(|t| !t.ptr_eq(&table));
                    }
                }
            }
            9 => {
                let target =
                    Target::function(NativeFunction::new("fuzz", move |_| Value::Int(value)));
                targets.push(target.clone());
                modifier.add_override_target(target);
                let _ = composite.call(&[]);
            }
            10 => {
                let proto = pick(&targets, value);
                let _ = composite.set_prototype_of(proto);
                let _ = composite.get(name.as_str());
            }
            _ => {
                let keys = composite.own_keys();
                let snapshot = composite.snapshot();
                assert!(snapshot.verify_hash());
                assert_eq!(keys.len(), snapshot.visible_keys.len());
            }
        }
    }

    let _ = composite.drain_events();
}

fn pick<T: Clone>(items: &[T], selector: i64) -> Option<T> {
    if items.is_empty() {
        return None;
    }
    let index = usize::try_from(selector).unwrap_or(0) % items.len();
    items.get(index).cloned()
}

fn key(data: &[u8], offset: usize) -> String {
    char::from(b'a' + byte(data, offset) % KEY_SPACE).to_string()
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
