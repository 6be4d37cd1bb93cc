use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use treealloc::{FixedArena, Heap};

const OPS: u64 = 10_000;

/// treealloc alloc/free throughput over a fixed arena.
fn treealloc_alloc_free(heap: &mut Heap<FixedArena>, size: usize) {
  for _ in 0..OPS {
    unsafe {
      let ptr = heap.allocate(size);
      black_box(ptr);
      heap.free(ptr);
    }
  }
}

/// libc alloc/free throughput.
fn libc_malloc_free(size: usize) {
  for _ in 0..OPS {
    unsafe {
      let ptr = libc::malloc(size);
      black_box(ptr);
      libc::free(ptr);
    }
  }
}

fn benchmark_alloc_throughput(c: &mut Criterion) {
  let mut group = c.benchmark_group("alloc_throughput");

  for size in [16, 64, 256, 1024, 4096] {
    group.throughput(Throughput::Elements(OPS));

    group.bench_with_input(BenchmarkId::new("treealloc", size), &size, |b, &size| {
      let mut heap = Heap::new(FixedArena::with_capacity(1 << 20)).unwrap();
      b.iter(|| treealloc_alloc_free(&mut heap, size))
    });

    group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &size| {
      b.iter(|| libc_malloc_free(size))
    });
  }

  group.finish();
}

criterion_group!(benches, benchmark_alloc_throughput);
criterion_main!(benches);
