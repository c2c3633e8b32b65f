//! Structural parsing: type recognition, nesting, TOML v1.0 special cases
//! and error cases, element ordering, parent navigation.

use sdv_toml::{Document, NodeType, Value};

fn parse(src: &str) -> Document {
    Document::parse(src).unwrap_or_else(|e| panic!("expected valid TOML, got {e}"))
}

#[test]
fn root_exists_and_has_no_parent() {
    let doc = parse("");
    assert_eq!(doc.node_type(doc.root()), NodeType::Table);
    assert!(doc.parent(doc.root()).is_none());
    assert!(doc.index_in_parent(doc.root()).is_none());
}

#[test]
fn recognize_tables() {
    let doc = parse("[newTable]\n[secondTable.nestedTable]\n");
    let table1 = doc.get("newTable").unwrap();
    assert_eq!(doc.node_type(table1), NodeType::Table);
    assert_eq!(doc.name(table1), "newTable");
    assert_eq!(doc.value(table1), Value::None);

    let table2 = doc.get("secondTable").unwrap();
    assert_eq!(doc.node_type(table2), NodeType::Table);
    let table3 = doc.get("secondTable.nestedTable").unwrap();
    assert_eq!(doc.node_type(table3), NodeType::Table);
    assert_eq!(doc.name(table3), "nestedTable");
}

#[test]
fn recognize_key_values() {
    let doc = parse(
        r#"name = "Hammer"
id = 42
pi = 3.1415926
boolean = true
array = []
table = {}
"#,
    );
    let name = doc.get("name").unwrap();
    assert_eq!(doc.node_type(name), NodeType::Str);
    assert_eq!(doc.value(name), Value::Str("Hammer".into()));
    assert_eq!(doc.index_in_parent(name), Some(0));

    let id = doc.get("id").unwrap();
    assert_eq!(doc.node_type(id), NodeType::Integer);
    assert_eq!(doc.value(id), Value::Int(42));
    assert_eq!(doc.index_in_parent(id), Some(1));

    let pi = doc.get("pi").unwrap();
    assert_eq!(doc.node_type(pi), NodeType::Float);
    assert_eq!(doc.index_in_parent(pi), Some(2));

    assert_eq!(doc.index_in_parent(doc.get("boolean").unwrap()), Some(3));
    assert_eq!(doc.node_type(doc.get("array").unwrap()), NodeType::Array);
    assert_eq!(doc.index_in_parent(doc.get("array").unwrap()), Some(4));
    assert_eq!(doc.node_type(doc.get("table").unwrap()), NodeType::Table);
    assert_eq!(doc.index_in_parent(doc.get("table").unwrap()), Some(5));
}

#[test]
fn recognize_table_arrays() {
    let doc = parse("[[newTableArray]]\n[[newTableArray]]\n[[table.nestedTableArray]]\n");
    let arr = doc.get("newTableArray").unwrap();
    assert_eq!(doc.node_type(arr), NodeType::Array);
    assert_eq!(doc.count(arr), 2);

    let elem0 = doc.get("newTableArray[0]").unwrap();
    assert_eq!(doc.node_type(elem0), NodeType::Table);
    let elem1 = doc.get("newTableArray[1]").unwrap();
    assert_eq!(doc.node_type(elem1), NodeType::Table);
    assert_ne!(elem0, elem1);
    assert!(doc.get("newTableArray[2]").is_none());

    let nested = doc.get("table.nestedTableArray").unwrap();
    assert_eq!(doc.count(nested), 1);
}

#[test]
fn nested_arrays() {
    let doc = parse(
        r#"arr_mixed = [ 1.0, 2, "test string", [ 1, 2 ], { pi = 3.14, e = 2.71828 }, true]
arr_ints = [ 1, 2, 3, 4]
arr_ints_trailing_comma = [ 1, 2, 3, 4, ]
arr_multiline = [
    "first line",
    "second line",
    "third_line",
]
"#,
    );

    let ints = doc.get("arr_ints").unwrap();
    assert_eq!(doc.count(ints), 4);
    for i in 0..4 {
        let elem = doc.get(&format!("arr_ints[{i}]")).unwrap();
        assert_eq!(doc.value(elem), Value::Int(i as i64 + 1));
        assert_eq!(doc.index_in_parent(elem), Some(i));
    }
    assert!(doc.get("arr_ints[4]").is_none());

    assert_eq!(doc.count(doc.get("arr_ints_trailing_comma").unwrap()), 4);

    assert_eq!(
        doc.value(doc.get("arr_mixed[0]").unwrap()),
        Value::Float(1.0)
    );
    assert_eq!(doc.value(doc.get("arr_mixed[1]").unwrap()), Value::Int(2));
    assert_eq!(
        doc.value(doc.get("arr_mixed[2]").unwrap()),
        Value::Str("test string".into())
    );
    assert_eq!(
        doc.node_type(doc.get("arr_mixed[3]").unwrap()),
        NodeType::Array
    );
    assert_eq!(doc.value(doc.get("arr_mixed[3][1]").unwrap()), Value::Int(2));
    assert_eq!(
        doc.node_type(doc.get("arr_mixed[4]").unwrap()),
        NodeType::Table
    );
    assert_eq!(
        doc.value(doc.get("arr_mixed[4].pi").unwrap()),
        Value::Float(3.14)
    );
    assert_eq!(
        doc.value(doc.get("arr_mixed[5]").unwrap()),
        Value::Bool(true)
    );
    assert!(doc.get("arr_mixed[6]").is_none());

    assert_eq!(
        doc.value(doc.get("arr_multiline[2]").unwrap()),
        Value::Str("third_line".into())
    );
}

#[test]
fn nested_tables() {
    let doc = parse(
        r#"[table]
a = 2
b = 1.2
[anotherTable]
a = 4
c = false
[thirdTable.fourthTable]
a = "five"
d = []
"#,
    );
    assert_eq!(doc.value(doc.get("table.a").unwrap()), Value::Int(2));
    assert_eq!(doc.value(doc.get("table.b").unwrap()), Value::Float(1.2));
    assert_eq!(doc.value(doc.get("anotherTable.a").unwrap()), Value::Int(4));
    assert_eq!(
        doc.value(doc.get("anotherTable.c").unwrap()),
        Value::Bool(false)
    );
    assert_eq!(
        doc.value(doc.get("thirdTable.fourthTable.a").unwrap()),
        Value::Str("five".into())
    );
    assert_eq!(
        doc.node_type(doc.get("thirdTable.fourthTable.d").unwrap()),
        NodeType::Array
    );
}

#[test]
fn nested_table_arrays() {
    let doc = parse(
        r#"[[table.test]]
a = 2
b = 1.2
[[table.test]]
a = 4
c = false
[[table.test]]
a = "five"
d = []
"#,
    );
    assert_eq!(doc.value(doc.get("table.test[0].a").unwrap()), Value::Int(2));
    assert_eq!(
        doc.value(doc.get("table.test[0].b").unwrap()),
        Value::Float(1.2)
    );
    assert_eq!(doc.value(doc.get("table.test[1].a").unwrap()), Value::Int(4));
    assert_eq!(
        doc.value(doc.get("table.test[1].c").unwrap()),
        Value::Bool(false)
    );
    assert_eq!(
        doc.value(doc.get("table.test[2].a").unwrap()),
        Value::Str("five".into())
    );
    assert_eq!(
        doc.index_in_parent(doc.get("table.test[2].d").unwrap()),
        Some(1)
    );
}

#[test]
fn inline_tables() {
    let doc = parse(
        r#"table1 = { a = 0, b = 1.2, c = "string" }
table2 = { a = [], b = true, e = 2.71828 }
table3 = { a = { a = "a", b = "A" }, b = {a = "b", b = "B"}, e = {a = "e", b = "E"} }
"#,
    );
    assert_eq!(doc.value(doc.get("table1.a").unwrap()), Value::Int(0));
    assert_eq!(doc.value(doc.get("table1.b").unwrap()), Value::Float(1.2));
    assert_eq!(
        doc.node_type(doc.get("table2.a").unwrap()),
        NodeType::Array
    );
    assert_eq!(
        doc.value(doc.get("table3.b.b").unwrap()),
        Value::Str("B".into())
    );
}

#[test]
fn special_case_keys() {
    parse("\"127.0.0.1\" = \"value\"\n\"character encoding\" = \"value\"\n\"ʎǝʞ\" = \"value\"\n'key2' = \"value\"\n'quoted \"value\"' = \"value\"\n");
    parse("key = \"value\"\nbare_key = \"value\"\nbare-key = \"value\"\n1234 = \"value\"\n");
    parse("\"\" = \"blank\"\n");
    parse("'' = 'blank'\n");
    parse("fruit.name = \"banana\"\nfruit. color = \"yellow\"\nfruit . flavor = \"banana\"\n");
    parse("fruit.apple.smooth = true\nfruit.orange = 2\n");

    let doc = parse("3.1415 = 3.1415\n");
    let table = doc.get("3").unwrap();
    assert_eq!(doc.node_type(table), NodeType::Table);
    let pi = doc.get("3.1415").unwrap();
    assert_eq!(doc.node_type(pi), NodeType::Float);
    assert_eq!(doc.value(pi), Value::Float(3.1415));
}

#[test]
fn special_case_tables() {
    parse("[a.b.c]\n[ d.e.f ]\n[ g .  h  . i ]\n[ j . \"ʞ\" . 'l' ]\n");
    // Super-table definition after a subtable is allowed.
    parse("[x.y.z.w]\n[x]\n");
    parse("[fruit.apple]\n[animal]\n[fruit.orange]\n");
    parse("[fruit]\napple.color = \"red\"\napple.taste.sweet = true\n[fruit.apple.texture]\n");
}

#[test]
fn special_case_table_arrays() {
    let doc = parse(
        r#"[[products]]
name = "Hammer"
sku = 738594937
[[products]]
[[products]]
name = "Nail"
sku = 284758393
color = "gray"
"#,
    );
    assert_eq!(doc.count(doc.get("products").unwrap()), 3);
    assert_eq!(doc.count(doc.get("products[1]").unwrap()), 0);
    assert_eq!(
        doc.value(doc.get("products[2].color").unwrap()),
        Value::Str("gray".into())
    );

    let doc = parse(
        r#"[[fruits]]
name = "apple"
[fruits.physical]
color = "red"
shape = "round"
[[fruits.varieties]]
name = "red delicious"
[[fruits.varieties]]
name = "granny smith"
[[fruits]]
name = "banana"
[[fruits.varieties]]
name = "plantain"
"#,
    );
    assert_eq!(doc.count(doc.get("fruits").unwrap()), 2);
    assert_eq!(
        doc.value(doc.get("fruits[0].physical.color").unwrap()),
        Value::Str("red".into())
    );
    assert_eq!(doc.count(doc.get("fruits[0].varieties").unwrap()), 2);
    assert_eq!(
        doc.value(doc.get("fruits[1].varieties[0].name").unwrap()),
        Value::Str("plantain".into())
    );

    let doc = parse(
        "points = [ { x = 1, y = 2, z = 3 },\n   { x = 7, y = 8, z = 9 },\n   { x = 2, y = 4, z = 8 } ]\n",
    );
    assert_eq!(doc.value(doc.get("points[1].y").unwrap()), Value::Int(8));
}

#[test]
fn error_cases_key_value() {
    assert!(Document::parse("key = # missing value\n").is_err());
    assert!(Document::parse("first = \"Tom\" last = \"Preston-Werner\"\n").is_err());
    assert!(Document::parse("= \"no key name\"\n").is_err());
    assert!(Document::parse("name = \"Tom\"\nname = \"Pradyun\"\n").is_err());
    assert!(Document::parse("fruit . flavor = \"banana\"\nfruit.flavor = \"banana\"\n").is_err());
    assert!(Document::parse("spelling = \"favorite\"\n\"spelling\" = \"favourite\"\n").is_err());
    assert!(Document::parse("fruit.apple = 1\nfruit.apple.smooth = true\n").is_err());
}

#[test]
fn error_cases_tables() {
    assert!(Document::parse("[ j . \"ʞ\" . 'l' ]\n[j.\"ʞ\".'l']\n").is_err());
    assert!(Document::parse("[ j . \"ʞ\" . 'l' ]\n[\"j\".'ʞ'.\"l\"]\n").is_err());
    assert!(Document::parse("[fruit]\napple = \"red\"\n[fruit]\norange = \"orange\"\n").is_err());
    assert!(
        Document::parse("[fruit]\napple = \"red\"\n[fruit.apple]\ntexture = \"smooth\"\n").is_err()
    );
    assert!(Document::parse(
        "[fruit]\napple.color = \"red\"\napple.taste.sweet = true\n[fruit.apple]\n"
    )
    .is_err());
    assert!(Document::parse(
        "[fruit]\napple.color = \"red\"\napple.taste.sweet = true\n[fruit.apple.taste]\n"
    )
    .is_err());
}

#[test]
fn error_cases_inline_tables() {
    assert!(Document::parse("type = { name = \"Nail\" }\ntype.edible = false\n").is_err());
    assert!(
        Document::parse("[product]\ntype.name = \"Nail\"\ntype = { edible = false }\n").is_err()
    );
}

#[test]
fn error_cases_table_arrays() {
    assert!(Document::parse(
        "[fruit.physical]\ncolor = \"red\"\nshape = \"round\"\n[[fruit]]\nname = \"apple\"\n"
    )
    .is_err());
    assert!(Document::parse("fruits = []\n[[fruits]]\n").is_err());
    assert!(Document::parse(
        "[[fruits]]\nname = \"apple\"\n[[fruits.varieties]]\nname = \"red delicious\"\n[fruits.varieties]\nname = \"granny smith\"\n"
    )
    .is_err());
    assert!(Document::parse(
        "[[fruits]]\nname = \"apple\"\n[fruits.physical]\ncolor = \"red\"\n[[fruits.physical]]\ncolor = \"green\"\n"
    )
    .is_err());
}

#[test]
fn array_ordering() {
    let doc = parse("array = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]\n");
    let arr = doc.get("array").unwrap();
    assert_eq!(doc.count(arr), 12);
    for i in 0..12 {
        assert_eq!(doc.value(doc.child(arr, i).unwrap()), Value::Int(i as i64));
    }
    assert_eq!(doc.value(doc.get("array[2]").unwrap()), Value::Int(2));
    assert_eq!(doc.value(doc.get("array[11]").unwrap()), Value::Int(11));
    // Numeric dotted access addresses array elements too.
    assert_eq!(doc.value(doc.get("array.7").unwrap()), Value::Int(7));
    // An empty index addresses the last element.
    assert_eq!(doc.value(doc.get("array[]").unwrap()), Value::Int(11));
}

#[test]
fn table_array_ordering() {
    let mut src = String::new();
    for i in 0..12 {
        src.push_str(&format!("[[tableArray]]\na = {i}\n"));
    }
    let doc = parse(&src);
    let arr = doc.get("tableArray").unwrap();
    assert_eq!(doc.count(arr), 12);
    for i in 0..12 {
        let elem = doc.child(arr, i).unwrap();
        assert_eq!(doc.value(doc.direct(elem, "a").unwrap()), Value::Int(i as i64));
    }
}

#[test]
fn direct_access_from_inner_nodes() {
    let doc = parse(
        r#"[[table.test]]
a = 2
[[table.test]]
a = 4
[[table.test]]
a = "five"
d = [ { x = 1, y = 2, z = 3 },
   { x = 7, y = 8, z = 9 },
   { x = 2, y = 4, z = 8 }]
"#,
    );
    let third = doc.get("table.test[2]").unwrap();
    let x = doc.direct(third, "d[2].x").unwrap();
    assert_eq!(doc.value(x), Value::Int(2));
}

#[test]
fn parent_navigation_and_paths() {
    let doc = parse(
        r#"[[table.test]]
a = 2
[[table.test]]
a = 4
"#,
    );
    let root = doc.root();
    let table = doc.get("table").unwrap();
    assert_eq!(doc.parent(table), Some(root));
    assert_eq!(doc.path(doc.parent(table).unwrap(), true), "");

    let test = doc.get("table.test").unwrap();
    assert_eq!(doc.parent(test), Some(table));
    assert_eq!(doc.path(test, true), "table.test");

    let elem0 = doc.get("table.test[0]").unwrap();
    assert_eq!(doc.parent(elem0), Some(test));
    assert_eq!(doc.path(elem0, true), "table.test[0]");

    let a0 = doc.get("table.test[0].a").unwrap();
    assert_eq!(doc.parent(a0), Some(elem0));
    assert_eq!(doc.path(a0, true), "table.test[0].a");

    let a1 = doc.get("table.test[1].a").unwrap();
    assert_eq!(doc.path(a1, true), "table.test[1].a");
    assert_eq!(doc.path(a1, false), "table.test.a");
}
