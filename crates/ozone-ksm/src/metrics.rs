//! Operation counters for the Key-Space Manager.
//!
//! An explicit metrics value owned by the service and passed in at
//! construction; there is no process-wide metrics registry.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct KsmMetrics {
    num_volume_creates: AtomicU64,
    num_volume_create_fails: AtomicU64,
    num_volume_modifies: AtomicU64,
    num_volume_modify_fails: AtomicU64,
    num_volume_infos: AtomicU64,
    num_volume_info_fails: AtomicU64,
    num_volume_deletes: AtomicU64,
    num_volume_delete_fails: AtomicU64,
    num_volume_lists: AtomicU64,
    num_volume_list_fails: AtomicU64,
    num_bucket_creates: AtomicU64,
    num_bucket_create_fails: AtomicU64,
    num_bucket_modifies: AtomicU64,
    num_bucket_modify_fails: AtomicU64,
    num_bucket_infos: AtomicU64,
    num_bucket_info_fails: AtomicU64,
    num_bucket_deletes: AtomicU64,
    num_bucket_delete_fails: AtomicU64,
    num_bucket_lists: AtomicU64,
    num_bucket_list_fails: AtomicU64,
    num_key_allocates: AtomicU64,
    num_key_allocate_fails: AtomicU64,
    num_key_lookups: AtomicU64,
    num_key_lookup_fails: AtomicU64,
    num_key_deletes: AtomicU64,
    num_key_delete_fails: AtomicU64,
    num_key_lists: AtomicU64,
    num_key_list_fails: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $field(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl KsmMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(inc_num_volume_creates, num_volume_creates);
    counter!(inc_num_volume_create_fails, num_volume_create_fails);
    counter!(inc_num_volume_modifies, num_volume_modifies);
    counter!(inc_num_volume_modify_fails, num_volume_modify_fails);
    counter!(inc_num_volume_infos, num_volume_infos);
    counter!(inc_num_volume_info_fails, num_volume_info_fails);
    counter!(inc_num_volume_deletes, num_volume_deletes);
    counter!(inc_num_volume_delete_fails, num_volume_delete_fails);
    counter!(inc_num_volume_lists, num_volume_lists);
    counter!(inc_num_volume_list_fails, num_volume_list_fails);
    counter!(inc_num_bucket_creates, num_bucket_creates);
    counter!(inc_num_bucket_create_fails, num_bucket_create_fails);
    counter!(inc_num_bucket_modifies, num_bucket_modifies);
    counter!(inc_num_bucket_modify_fails, num_bucket_modify_fails);
    counter!(inc_num_bucket_infos, num_bucket_infos);
    counter!(inc_num_bucket_info_fails, num_bucket_info_fails);
    counter!(inc_num_bucket_deletes, num_bucket_deletes);
    counter!(inc_num_bucket_delete_fails, num_bucket_delete_fails);
    counter!(inc_num_bucket_lists, num_bucket_lists);
    counter!(inc_num_bucket_list_fails, num_bucket_list_fails);
    counter!(inc_num_key_allocates, num_key_allocates);
    counter!(inc_num_key_allocate_fails, num_key_allocate_fails);
    counter!(inc_num_key_lookups, num_key_lookups);
    counter!(inc_num_key_lookup_fails, num_key_lookup_fails);
    counter!(inc_num_key_deletes, num_key_deletes);
    counter!(inc_num_key_delete_fails, num_key_delete_fails);
    counter!(inc_num_key_lists, num_key_lists);
    counter!(inc_num_key_list_fails, num_key_list_fails);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_fail_increments_fail_counter() {
        let metrics = KsmMetrics::new();
        metrics.inc_num_volume_creates();
        metrics.inc_num_volume_create_fails();
        assert_eq!(metrics.num_volume_creates(), 1);
        assert_eq!(metrics.num_volume_create_fails(), 1);
    }
}
