// tests/property/ready_queue_test.rs

//! Property-based tests for the request handler's ready queue
//! Tests that every buffered message is dispatched and no source gets two turns in a cycle

use ldapgate::server::{ReadyQueue, ReadySource};
use proptest::prelude::*;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Clone)]
struct Source {
    id: u64,
    pending: Rc<Cell<usize>>,
    log: Rc<RefCell<Vec<u64>>>,
}

impl ReadySource for Source {
    fn source_id(&self) -> u64 {
        self.id
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn element_available(&self) -> bool {
        self.pending.get() > 0
    }

    fn process_next_message(&self) -> bool {
        self.pending.set(self.pending.get() - 1);
        self.log.borrow_mut().push(self.id);
        true
    }
}

proptest! {
    #[test]
    fn test_every_message_is_dispatched_fairly(
        pending in prop::collection::vec(0usize..20, 1..16),
    ) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = ReadyQueue::new();
        for (id, count) in pending.iter().enumerate() {
            queue.push(Source {
                id: id as u64,
                pending: Rc::new(Cell::new(*count)),
                log: log.clone(),
            });
        }

        let mut cycles = 0;
        while !queue.is_empty() {
            let before = log.borrow().len();
            let dispatched = queue.service_cycle();
            let cycle: Vec<u64> = log.borrow()[before..].to_vec();

            let unique: HashSet<u64> = cycle.iter().copied().collect();
            prop_assert_eq!(unique.len(), cycle.len());
            prop_assert_eq!(dispatched, cycle.len());
            cycles += 1;
        }

        let total: usize = pending.iter().sum();
        prop_assert_eq!(log.borrow().len(), total);
        prop_assert_eq!(cycles, pending.iter().copied().max().unwrap_or(0).max(1));
    }
}
