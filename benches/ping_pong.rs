//! Benchmarks the cost of a bare `call`/`yield` transfer: the thing every
//! suspension point in this crate ultimately bottoms out on.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fiberio::{Config, EpollReactor, Runtime};

fn ping_10k_round_trips(c: &mut Criterion) {
	const ROUND_TRIPS: usize = 10_000;

	c.bench_function("ping_10k_round_trips", |b| {
		b.iter(|| {
			let rt = Runtime::new(EpollReactor::new().expect("epoll available"), Config::new())
				.expect("runtime construction should succeed");

			let fiber = rt.create("ping", move |rt| {
				for _ in 0..ROUND_TRIPS {
					rt.yield_now();
				}
			});

			for _ in 0..ROUND_TRIPS {
				rt.call(fiber, &[]).expect("fiber is alive");
			}

			black_box(rt.is_reclaimed(fiber));
		});
	});
}

fn ping_pong_10k_round_trips(c: &mut Criterion) {
	const ROUND_TRIPS: usize = 10_000;

	c.bench_function("ping_pong_10k_round_trips", |b| {
		b.iter(|| {
			let rt = Runtime::new(EpollReactor::new().expect("epoll available"), Config::new())
				.expect("runtime construction should succeed");

			let a = rt.create("a", move |rt| {
				for _ in 0..ROUND_TRIPS {
					rt.yield_now();
				}
			});

			let b_fiber = rt.create("b", move |rt| {
				for _ in 0..ROUND_TRIPS {
					rt.yield_now();
				}
			});

			for _ in 0..ROUND_TRIPS {
				rt.call(a, &[]).expect("a is alive");
				rt.call(b_fiber, &[]).expect("b is alive");
			}

			black_box((rt.is_reclaimed(a), rt.is_reclaimed(b_fiber)));
		});
	});
}

criterion_group!(ping_pong, ping_10k_round_trips, ping_pong_10k_round_trips);
criterion_main!(ping_pong);
