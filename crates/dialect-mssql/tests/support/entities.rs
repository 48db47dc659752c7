use quarry_core::{
    ColumnDef, Entity, EntityBuilder, EntityDescriptor, MetadataError, Value, ValueType,
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Person {
    pub id: i32,
    pub first: String,
    pub last: String,
    pub age: i32,
    pub dept: String,
    pub salary: f64,
}

impl Entity for Person {
    fn build_descriptor() -> Result<EntityDescriptor, MetadataError> {
        EntityBuilder::<Self>::new()
            .table("people")
            .column(
                ColumnDef::new("id", ValueType::Int32)
                    .primary_key()
                    .auto_increment(),
                |person| Value::Int32(person.id),
                |person, value| {
                    person.id = value.to_i32()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("first", ValueType::String),
                |person| Value::String(person.first.clone()),
                |person, value| {
                    person.first = value.to_string_value()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("last", ValueType::String),
                |person| Value::String(person.last.clone()),
                |person, value| {
                    person.last = value.to_string_value()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("age", ValueType::Int32),
                |person| Value::Int32(person.age),
                |person, value| {
                    person.age = value.to_i32()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("dept", ValueType::String),
                |person| Value::String(person.dept.clone()),
                |person, value| {
                    person.dept = value.to_string_value()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("salary", ValueType::Float64),
                |person| Value::Float64(person.salary),
                |person, value| {
                    person.salary = value.to_f64()?;
                    Ok(())
                },
            )
            .build()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Company {
    pub id: i32,
    pub name: String,
}

impl Entity for Company {
    fn build_descriptor() -> Result<EntityDescriptor, MetadataError> {
        EntityBuilder::<Self>::new()
            .table("companies")
            .column(
                ColumnDef::new("id", ValueType::Int32).primary_key(),
                |company| Value::Int32(company.id),
                |company, value| {
                    company.id = value.to_i32()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("name", ValueType::String),
                |company| Value::String(company.name.clone()),
                |company, value| {
                    company.name = value.to_string_value()?;
                    Ok(())
                },
            )
            .build()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Author {
    pub id: i32,
    pub name: String,
    pub company_id: i32,
    pub company: Option<Company>,
}

impl Entity for Author {
    fn build_descriptor() -> Result<EntityDescriptor, MetadataError> {
        EntityBuilder::<Self>::new()
            .table("authors")
            .column(
                ColumnDef::new("id", ValueType::Int32).primary_key(),
                |author| Value::Int32(author.id),
                |author, value| {
                    author.id = value.to_i32()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("name", ValueType::String),
                |author| Value::String(author.name.clone()),
                |author, value| {
                    author.name = value.to_string_value()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("company_id", ValueType::Int32),
                |author| Value::Int32(author.company_id),
                |author, value| {
                    author.company_id = value.to_i32()?;
                    Ok(())
                },
            )
            .to_one::<Company, _>("Company", "company_id", |author, company| {
                author.company = Some(company);
            })
            .build()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author_id: i32,
    pub author: Option<Author>,
}

impl Entity for Book {
    fn build_descriptor() -> Result<EntityDescriptor, MetadataError> {
        EntityBuilder::<Self>::new()
            .table("books")
            .column(
                ColumnDef::new("id", ValueType::Int32).primary_key(),
                |book| Value::Int32(book.id),
                |book, value| {
                    book.id = value.to_i32()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("title", ValueType::String),
                |book| Value::String(book.title.clone()),
                |book, value| {
                    book.title = value.to_string_value()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("author_id", ValueType::Int32),
                |book| Value::Int32(book.author_id),
                |book, value| {
                    book.author_id = value.to_i32()?;
                    Ok(())
                },
            )
            .to_one::<Author, _>("Author", "author_id", |book, author| {
                book.author = Some(author);
            })
            .build()
    }
}
