use std::collections::HashMap;

/// 以證券代碼等欄位作為鍵
pub trait Keyable {
    fn key(&self) -> String;
}

/// 依 `Keyable::key` 建立索引，重複的鍵以後者為準
pub fn to_key_map<T: Keyable>(entities: &[T]) -> HashMap<String, &T> {
    let mut map = HashMap::with_capacity(entities.len());
    for e in entities {
        map.insert(e.key(), e);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(&'static str, i32);

    impl Keyable for Item {
        fn key(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_to_key_map_last_wins() {
        let items = vec![Item("A", 1), Item("B", 2), Item("A", 3)];
        let map = to_key_map(&items);

        assert_eq!(map.len(), 2);
        assert_eq!(map["A"].1, 3);
        assert_eq!(map["B"].key(), "B");
    }
}
