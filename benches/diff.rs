use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wmsync::codebase::Codebases;
use wmsync::sync::diff::{diff, sort_changes, DiffOptions};
use wmsync::types::FlatTree;

/// A workspace of `n` scripts and variables, with every tenth edited on the
/// new side and every seventh missing from the old side.
fn snapshots(n: usize) -> (FlatTree, FlatTree) {
    let mut new = FlatTree::new();
    let mut old = FlatTree::new();
    for i in 0..n {
        let script = format!("f/team{}/s{}.py", i % 20, i);
        let meta = format!("f/team{}/s{}.script.yaml", i % 20, i);
        let variable = format!("f/team{}/v{}.variable.yaml", i % 20, i);
        let body = format!("def main(x: int):\n    return x + {}\n", i);
        new.insert(script.clone(), body.clone());
        new.insert(meta.clone(), format!("summary: s{}\nlock: abc\n", i));
        new.insert(variable.clone(), format!("value: {}\nis_secret: false\n", i));
        if i % 7 == 0 {
            continue;
        }
        let old_body = if i % 10 == 0 { format!("{}# edited\n", body) } else { body };
        old.insert(script, old_body);
        old.insert(meta, format!("lock: ''\nsummary: s{}\n", i));
        old.insert(variable, format!("is_secret: false\nvalue: {}\n", i));
    }
    (new, old)
}

pub fn benchmark_diff(c: &mut Criterion) {
    let codebases = Codebases::compile(Path::new("."), &[]).unwrap();
    let options = DiffOptions::default();
    let mut group = c.benchmark_group("Diff");
    for n in [100, 1000] {
        let (new, old) = snapshots(n);
        group.bench_function(format!("{} artifacts", n), |b| {
            b.iter(|| {
                let mut changes = diff(black_box(&new), black_box(&old), &options, &codebases);
                sort_changes(&mut changes);
                changes
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_diff);
criterion_main!(benches);
