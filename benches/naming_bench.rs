use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sharewarez::naming::{clean_game_name, NameCleaner, ReleaseGroups};
use sharewarez::scanner::{build_globset, discover_files, discover_folders};
use std::fs;
use std::hint::black_box;
use tempfile::TempDir;

const SAMPLES: [&str; 8] = [
    "setupNethack.v1.2.3-REPACK-GOG-Build.456+5DLCs",
    "The_Witcher_3_Wild_Hunt_GOTY_Edition",
    "Cyberpunk.2077.Ultimate.Edition-GOG",
    "S.T.A.L.K.E.R.Shadow.of.Chernobyl.v1.0006-CPY",
    "Half-Life [FitGirl Repack]",
    "Baldurs.Gate.3.Digital.Deluxe.incl.all.DLCs",
    "Doom",
    "Age.of.Empires.II.Definitive.Edition.Build.36906-FLT",
];

fn groups() -> ReleaseGroups {
    ReleaseGroups {
        insensitive: ["-GOG", "-REPACK", "-FLT", "-CODEX", "-SKIDROW", "-PLAZA", "-DARKSIDERS", "-TINYISO"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        sensitive: ["-CPY", "-RAZOR", "-ELAMIGOS"].iter().map(|s| s.to_string()).collect(),
    }
}

fn bench_clean_names(c: &mut Criterion) {
    let groups = groups();
    let cleaner = NameCleaner::new(&groups);

    c.bench_function("clean_compiled", |b| {
        b.iter(|| {
            for raw in SAMPLES {
                black_box(cleaner.clean(black_box(raw)));
            }
        });
    });

    // Compiles the group alternations on every call
    c.bench_function("clean_one_shot", |b| {
        b.iter(|| {
            for raw in SAMPLES {
                black_box(clean_game_name(black_box(raw), &groups));
            }
        });
    });
}

fn bench_group_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("release_group_count");
    for count in [0usize, 16, 128] {
        let groups = ReleaseGroups {
            insensitive: (0..count).map(|i| format!("-GRP{}", i)).collect(),
            sensitive: vec![],
        };
        let cleaner = NameCleaner::new(&groups);
        group.bench_with_input(BenchmarkId::from_parameter(count), &cleaner, |b, cleaner| {
            b.iter(|| black_box(cleaner.clean(black_box("Some.Game.v1.2.3-GRP7"))));
        });
    }
    group.finish();
}

fn library_tree(games: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    for i in 0..games {
        let game = dir.path().join(format!("Game.Number.{}.v1.{}.0-GOG", i, i % 7));
        fs::create_dir_all(game.join("data")).unwrap();
        fs::write(game.join(format!("game{}.iso", i)), b"iso").unwrap();
        fs::write(game.join("readme.nfo"), b"nfo").unwrap();
    }
    dir
}

fn bench_discovery(c: &mut Criterion) {
    let dir = library_tree(200);
    let cleaner = NameCleaner::new(&groups());
    let excludes = build_globset(&["**/data".to_string()]).unwrap();
    let allowed = vec!["iso".to_string()];
    let ignored = vec!["nfo".to_string()];

    let mut group = c.benchmark_group("discovery");
    group.bench_function("folders", |b| {
        b.iter(|| black_box(discover_folders(dir.path(), &cleaner, &excludes).unwrap()));
    });
    group.bench_function("files", |b| {
        b.iter(|| black_box(discover_files(dir.path(), &allowed, &ignored, &cleaner, &excludes).unwrap()));
    });
    group.finish();
}

criterion_group!(benches, bench_clean_names, bench_group_count, bench_discovery);
criterion_main!(benches);
