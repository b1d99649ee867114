use agri_advisor::{RevealConfig, RevealState, format_response, render_html};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

const ADVICE: &str = "# Introduction
Rice grown on **clay** soil holds water well, so irrigation can be spaced out.

# Key Recommendations
1. **Alternate wetting and drying** saves up to a third of the water
2. **Laser levelling** keeps the standing water even
- **Timing:** irrigate early in the morning
- **Depth:** keep 2-5 cm during tillering
* Check bunds for leaks after heavy rain
* Mulch field margins

# Government Support
Visit: pmkisan.gov.in for the income support scheme.
Portal: https://pmksy.gov.in/ (micro-irrigation subsidies).
See <a href=\"https://icar.org.in\">ICAR</a> and www.agricoop.nic.in for guides.

# Related Topics for Further Learning
* Drip irrigation for vegetables
* Soil moisture sensors";

fn bench_format(c: &mut Criterion) {
    c.bench_function("format_response::advice", |b| {
        b.iter(|| {
            let fragments = format_response(black_box(ADVICE));
            black_box(render_html(&fragments));
        });
    });

    for &copies in &[1usize, 8, 32] {
        let text = vec![ADVICE; copies].join("\n\n");
        c.bench_with_input(
            BenchmarkId::new("format_response::repeated", copies),
            &text,
            |b, text| {
                b.iter(|| black_box(format_response(text)).len());
            },
        );
    }
}

fn bench_reveal_frames(c: &mut Criterion) {
    let fragments = format_response(ADVICE);
    c.bench_function("reveal_state::all_frames", |b| {
        b.iter(|| {
            let frames = RevealState::new(fragments.clone(), RevealConfig::instant());
            black_box(frames.count());
        });
    });
}

criterion_group!(benches, bench_format, bench_reveal_frames);
criterion_main!(benches);
