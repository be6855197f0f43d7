use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a thread panicked while holding it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cut `name` so it fits in a NUL terminated field of `field_len` bytes, never splitting a
/// character.
pub(crate) fn truncate_to_field(mut name: String, field_len: usize) -> String {
    let max = field_len.saturating_sub(1);
    if name.len() > max {
        let mut end = max;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn truncate() {
        assert_eq!(truncate_to_field("enp3s0".to_string(), 16), "enp3s0");
        assert_eq!(
            truncate_to_field("enp123456789s123456".to_string(), 16),
            "enp123456789s12"
        );
        assert_eq!(truncate_to_field("abc".to_string(), 0), "");
        assert_eq!(truncate_to_field("ééé".to_string(), 5), "éé");
    }

    #[test]
    fn lock_survives_poison() {
        let m = Arc::new(Mutex::new(5));
        let m2 = m.clone();

        let r = thread::spawn(move || {
            let _g = m2.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(r.is_err());
        assert!(m.is_poisoned());

        assert_eq!(*lock(&m), 5);
    }
}
