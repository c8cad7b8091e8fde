//! Property tests for registry ordering.
//!
//! For any number of slots and any failure point, finalizers run in exact
//! reverse of initialization and nothing registered after the failure point
//! is touched.

use std::cell::RefCell;
use std::rc::Rc;

use ember_servers::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Init(usize),
    Finish(usize),
    Destroy(usize),
}

fn build(count: usize, fail_at: Option<usize>, events: &Rc<RefCell<Vec<Event>>>) -> ServerRegistry {
    let mut registry = ServerRegistry::new();
    for k in 0..count {
        let (i, f, d) = (events.clone(), events.clone(), events.clone());
        registry
            .register(
                &format!("server_{k}"),
                move |_| Ok(k),
                move |k: &mut usize| {
                    i.borrow_mut().push(Event::Init(*k));
                    if fail_at == Some(*k) {
                        Err(ServerError::InitFailed {
                            server: format!("server_{k}"),
                            reason: "injected".into(),
                        })
                    } else {
                        Ok(())
                    }
                },
                move |k: &mut usize| f.borrow_mut().push(Event::Finish(*k)),
                move |k: usize| d.borrow_mut().push(Event::Destroy(k)),
            )
            .unwrap();
    }
    registry
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn finalizers_run_in_reverse_of_initializers(count in 1usize..16) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut registry = build(count, None, &events);
        registry.init_all().unwrap();
        registry.finish_all();
        registry.finish_all();

        let finishes: Vec<usize> = events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Finish(k) => Some(*k),
                _ => None,
            })
            .collect();
        let expected: Vec<usize> = (0..count).rev().collect();
        prop_assert_eq!(finishes, expected);

        for k in 0..count {
            prop_assert_eq!(registry.state(&format!("server_{k}")), Some(ServerState::Destroyed));
        }
    }

    #[test]
    fn rollback_unwinds_exactly_the_initialized_prefix(count in 1usize..16, fail in 0usize..16) {
        let fail = fail % count;
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut registry = build(count, Some(fail), &events);

        let err = registry.init_all().unwrap_err();
        let is_injected = matches!(err, ServerError::InitFailed { ref reason, .. } if reason == "injected");
        prop_assert!(is_injected);

        let events = events.borrow();
        let inits: Vec<usize> = events.iter().filter_map(|e| match e { Event::Init(k) => Some(*k), _ => None }).collect();
        let finishes: Vec<usize> = events.iter().filter_map(|e| match e { Event::Finish(k) => Some(*k), _ => None }).collect();
        let destroys: Vec<usize> = events.iter().filter_map(|e| match e { Event::Destroy(k) => Some(*k), _ => None }).collect();

        prop_assert_eq!(inits, (0..=fail).collect::<Vec<_>>());
        prop_assert_eq!(finishes, (0..fail).rev().collect::<Vec<_>>());
        prop_assert_eq!(destroys, (0..=fail).rev().collect::<Vec<_>>());
    }
}
