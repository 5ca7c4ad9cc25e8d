use usage_metrics::{MetricEvent, PriceTable, UsageEngine};

fn approx(left: f64, right: f64) -> bool {
    (left - right).abs() < 1e-9
}

/// Small deterministic generator so the sequences are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

#[test]
fn scenario_a_first_observation_is_fully_credited() {
    let engine = UsageEngine::new(PriceTable::new());
    engine.submit(
        MetricEvent::new("m1", "openai")
            .with_tokens(100, 50)
            .with_duration_ms(2000)
            .with_request_count(1),
    );

    let records = engine.reduce(10);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(approx(record.prompt_tokens_per_second, 10.0));
    assert!(approx(record.complete_tokens_per_second, 5.0));
    assert!(approx(record.tokens_per_second, 15.0));
    assert_eq!(record.avg_duration, 2000);
    assert_eq!(record.max_duration, 2000);
    assert!(approx(record.requests_per_second, 0.1));
}

#[test]
fn scenario_b_growth_is_credited_as_difference() {
    let engine = UsageEngine::new(PriceTable::new());
    engine.submit(
        MetricEvent::new("m1", "openai")
            .with_tokens(100, 50)
            .with_duration_ms(2000)
            .with_request_count(1),
    );
    engine.reduce(10);

    engine.submit(
        MetricEvent::new("m1", "openai")
            .with_tokens(130, 0)
            .with_request_count(2),
    );
    let records = engine.reduce(10);
    let record = &records[0];

    assert!(approx(record.prompt_tokens_per_second, 3.0));
    assert!(approx(record.requests_per_second, 0.1));
    assert_eq!(record.max_duration, 2000);
}

#[test]
fn credited_deltas_sum_to_cumulative_growth() {
    let mut rng = Lcg(42);

    for _ in 0..20 {
        let engine = UsageEngine::new(PriceTable::new());
        let initial = 1 + rng.next(500);
        let mut prompt = initial;
        let mut request_count = 1;
        let mut last_submitted = 0;
        let mut credited = 0.0;

        for _ in 0..30 {
            // A few observations per cycle, occasionally none
            for _ in 0..rng.next(3) {
                engine.submit(
                    MetricEvent::new("m1", "openai")
                        .with_tokens(prompt, 0)
                        .with_request_count(request_count),
                );
                last_submitted = prompt;
                prompt += rng.next(200);
                request_count += 1;
            }

            if let Some(record) = engine.reduce(1).first() {
                credited += record.prompt_tokens_per_second;
            }
        }

        if last_submitted == 0 {
            continue;
        }
        // The first observation credits the initial value in full, every
        // later cycle credits exactly its growth.
        assert!(approx(credited - initial as f64, (last_submitted - initial) as f64));
    }
}

#[test]
fn regression_without_restart_credits_zero() {
    let engine = UsageEngine::new(PriceTable::new());
    engine.submit(
        MetricEvent::new("m1", "openai")
            .with_tokens(500, 300)
            .with_duration_ms(4000)
            .with_request_count(1),
    );
    engine.submit(
        MetricEvent::new("m1", "openai")
            .with_tokens(800, 400)
            .with_duration_ms(6000)
            .with_request_count(2),
    );
    engine.reduce(1);

    engine.submit(
        MetricEvent::new("m1", "openai")
            .with_tokens(200, 100)
            .with_duration_ms(1000)
            .with_request_count(3),
    );
    let record = engine.reduce(1).remove(0);

    assert_eq!(record.prompt_tokens_per_second, 0.0);
    assert_eq!(record.complete_tokens_per_second, 0.0);
    assert_eq!(record.tokens_per_second, 0.0);
    // The request counter still grew, the duration did not
    assert_eq!(record.avg_duration, 0);
    assert!(approx(record.requests_per_second, 1.0));
}

#[test]
fn max_duration_never_decreases_across_cycles() {
    let engine = UsageEngine::new(PriceTable::new());
    let observations = [
        (1, 3000),
        (2, 3500),
        (3, 9500),
        (4, 9600),
        (4, 9600),
        (6, 10000),
    ];

    let mut previous_max = 0;
    for (request_count, duration) in observations {
        engine.submit(
            MetricEvent::new("m1", "openai")
                .with_duration_ms(duration)
                .with_request_count(request_count),
        );
        let record = engine.reduce(5).remove(0);
        assert!(record.max_duration >= previous_max);
        assert!(record.max_duration >= record.avg_duration);
        previous_max = record.max_duration;

        // A quiet cycle keeps the maximum
        let quiet = engine.reduce(5).remove(0);
        assert_eq!(quiet.avg_duration, 0);
        assert_eq!(quiet.max_duration, previous_max);
    }
    assert_eq!(previous_max, 6000);
}
