use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nlq::lexer::Lexer;
use nlq::parser::Parser;

const TOP_N: &str = r#"filtered_df = df.sort_values('Sales', ascending=False).head(5)"#;

const FILTER: &str = r#"filtered_df = df[(df['Sales'] > 100) & (df['Region'].isin(['West', 'East']))]"#;

const GROUPED: &str = r#"
import pandas as pd
df['Sales'] = pd.to_numeric(df['Sales'], errors='coerce')
totals = df.groupby('Region', as_index=False).agg(
    total=('Sales', 'sum'),
    best=('Sales', 'max'),
)
filtered_df = totals.sort_values('total', ascending=False).reset_index(drop=True)
"#;

const MULTI_STEP: &str = r#"
# states in the top decile, or any state starting with "New"
top = df['Sales'].max() * 0.9
mask = (df['Sales'] >= top) | df['State'].str.contains('^New', regex=True)
picked = df.loc[mask, ['State', 'Region', 'Sales']]
picked['Share'] = (picked['Sales'] / df['Sales'].sum() * 100).round(1)
filtered_df = picked.nlargest(10, 'Sales') if len(picked) > 10 else picked
"#;

const PROGRAMS: [(&str, &str); 4] =
    [("top_n", TOP_N), ("filter", FILTER), ("grouped", GROUPED), ("multi_step", MULTI_STEP)];

fn bench_lex(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer");
    for (name, src) in PROGRAMS {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut lex = Lexer::new(black_box(src));
                lex.tokenize().unwrap()
            })
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");
    for (name, src) in PROGRAMS {
        let mut lex = Lexer::new(src);
        let tokens = lex.tokenize().unwrap();
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut par = Parser::new(black_box(tokens.clone()));
                par.parse().unwrap()
            })
        });
    }
    group.finish();
}

fn bench_lex_and_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("lex+parse");
    for (name, src) in PROGRAMS {
        group.bench_function(name, |b| {
            b.iter(|| nlq::parser::parse_program(black_box(src)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lex, bench_parse, bench_lex_and_parse);
criterion_main!(benches);
